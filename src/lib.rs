pub mod address_info;
pub mod analysis_config;
pub mod arch;
pub mod arm;
pub mod containers;
pub mod context;
pub mod fixpoint;
pub mod graphviz;
pub mod lifter;
pub mod machine_state;
pub mod mips;
pub mod program;
pub mod stack_frame;
pub mod symval;
pub mod tests;

pub mod log {
    pub use slog_scope::{crit, debug, error, info, trace, warn};

    pub struct FileAndTermDrain {
        file_drain: Option<slog::Logger>,
        term_drain: slog::Logger,
    }
    impl FileAndTermDrain {
        pub fn new(
            debug_level: usize,
            disable_terminal_logging: bool,
            force_block: bool,
            path: Option<std::path::PathBuf>,
        ) -> slog::Logger {
            use sloggers::Build;

            let debug_level = match debug_level {
                0 => sloggers::types::Severity::Warning,
                1 => sloggers::types::Severity::Info,
                2 => sloggers::types::Severity::Debug,
                3 => sloggers::types::Severity::Trace,
                _ => sloggers::types::Severity::Trace,
            };

            let term_drain = if disable_terminal_logging {
                sloggers::null::NullLoggerBuilder.build().unwrap()
            } else {
                sloggers::terminal::TerminalLoggerBuilder::new()
                    .destination(sloggers::terminal::Destination::Stderr)
                    .level(if path.is_none() {
                        debug_level
                    } else {
                        sloggers::types::Severity::Error
                    })
                    .overflow_strategy(if force_block || path.is_none() {
                        sloggers::types::OverflowStrategy::Block
                    } else {
                        sloggers::types::OverflowStrategy::DropAndReport
                    })
                    .format(sloggers::types::Format::Compact)
                    .build()
                    .unwrap()
            };

            let file_drain = path.map(|path| {
                sloggers::file::FileLoggerBuilder::new(path)
                    .truncate()
                    .level(debug_level)
                    .overflow_strategy(sloggers::types::OverflowStrategy::Block)
                    .format(sloggers::types::Format::Json)
                    .build()
                    .unwrap()
            });

            slog::Logger::root(
                Self {
                    file_drain,
                    term_drain,
                },
                slog::o!(),
            )
        }
    }
    impl slog::Drain for FileAndTermDrain {
        type Ok = ();
        type Err = slog::Never;
        fn log(
            &self,
            r: &slog::Record<'_>,
            kv: &slog::OwnedKVList,
        ) -> Result<<Self as slog::Drain>::Ok, <Self as slog::Drain>::Err> {
            if let Some(f) = &self.file_drain {
                <slog::Logger as slog::Drain>::log(f, r, kv)?;
            }
            <slog::Logger as slog::Drain>::log(&self.term_drain, r, kv)?;
            Ok(())
        }
    }
}
