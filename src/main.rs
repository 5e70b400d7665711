use aflow::*;

use std::path::PathBuf;

use clap::Parser;

/// Resolve memory-access addresses across call contexts
#[derive(Parser, Debug)]
#[clap(about, version, author)]
enum Args {
    /// Analyze an exported control-flow-graph file
    FromCfgExport {
        /// Path to a `.cfg-exported` file, produced by the upstream CFG
        /// construction pass
        exported_cfg: PathBuf,
        /// Path to output file for the per-context address report
        #[clap(long)]
        output_report: Option<PathBuf>,
        /// Output the call-context tree (with per-context stack pointers) as
        /// a GraphViz `.dot` file to the given path
        #[clap(long)]
        debug_output_graphviz: Option<PathBuf>,
        /// Disable terminal logging, even for high severity alerts. Strongly
        /// discouraged for normal use.
        #[clap(long)]
        debug_disable_terminal_logging: bool,
        /// Force blocking for terminal logging. If too many messages are being
        /// spewed the logger, by default, does not block, but instead dumps a
        /// dropped-messages alert. This option forces it to block and dump
        /// even if too many are being sent.
        #[clap(long)]
        debug_forced_blocking_terminal_logging: bool,
        /// Path to send log (as JSON) to
        ///
        /// Error or higher severity alerts will still continue being shown at
        /// stderr (in addition to being added to the log)
        #[clap(long = "--log")]
        log_file: Option<PathBuf>,
        /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
        #[clap(short, long, parse(from_occurrences))]
        debug: usize,
        /// Advanced configuration options to tweak the analysis behavior
        #[clap(short = 'Z', long, arg_enum)]
        advanced_config: Vec<analysis_config::CommandLineAnalysisConfig>,
    },
}

fn main() {
    let args = Args::parse();

    match args {
        Args::FromCfgExport {
            exported_cfg,
            output_report,
            debug_output_graphviz,
            debug_disable_terminal_logging,
            debug_forced_blocking_terminal_logging,
            log_file,
            debug,
            advanced_config,
        } => {
            let _log_guard = slog_scope::set_global_logger(crate::log::FileAndTermDrain::new(
                debug,
                debug_disable_terminal_logging,
                debug_forced_blocking_terminal_logging,
                log_file,
            ));

            analysis_config::AnalysisConfig::initialize(advanced_config);

            let prog = lifter::lift_from(
                &std::fs::read_to_string(&exported_cfg)
                    .expect("CFG export file could not be read"),
            );

            let arch = arch::arch_for(prog.arch);
            let tree = context::ContextTree::build(&prog);
            let frames = stack_frame::StackFrameAnalysis::run(&prog, &tree, arch.as_ref());

            let dot_path = debug_output_graphviz.or_else(|| {
                analysis_config::CONFIG
                    .dump_context_tree_dot_files
                    .then(|| exported_cfg.with_extension("context-tree.dot"))
            });
            if let Some(path) = dot_path {
                use std::io::Write;
                write!(
                    std::fs::File::create(path).unwrap(),
                    "{}",
                    graphviz::generate_context_tree_dot(&prog, &tree, Some(&frames))
                )
                .unwrap();
            }

            let results = fixpoint::AddressFlow::analyze(&prog, arch.as_ref(), &tree, &frames);

            if let Some(path) = output_report {
                let mut f = std::fs::File::create(path).unwrap();
                results.write_report(&prog, &tree, &mut f).unwrap();
            } else {
                let stdout = std::io::stdout();
                results
                    .write_report(&prog, &tree, &mut stdout.lock())
                    .unwrap();
            }

            log::trace!("Done");
        }
    }
}
