//! A global store of flags that can impact the address-flow analysis.
//!
//! WARNING: Currently only supports a single consistent configuration amongst threads (i.e., cannot
//! have different configurations for different analysis executions in the same process).

/// The global configuration store. Its fields are expected to be accessed across the program via
/// the global [`CONFIG`](static@CONFIG).
pub struct AnalysisConfig {
    /// Emit a warning each time a memory access degrades to an "unknown pointer" record spanning
    /// every data segment. These warnings are the primary signal that a binary needs more modeling.
    pub warn_on_unknown_pointer: bool,
    /// Upper bound on fixpoint passes, as a multiple of the contextual node count. Exceeding it
    /// means the join is not behaving monotonically and the run aborts rather than looping forever.
    pub max_fixpoint_pass_multiplier: usize,
    /// Treat calls whose target has no known control-flow graph as intraprocedural no-ops (beyond
    /// clobbering the return-value registers). Disabling this makes such calls a hard error.
    pub allow_unresolved_call_targets: bool,
    /// Whether to dump a `context-tree-*.dot` file for debugging.
    pub dump_context_tree_dot_files: bool,
    /// Whether to print each machine state as it is joined at a contextual node (useful when
    /// debugging non-convergence).
    pub debug_print_states_at_join: bool,
}

impl AnalysisConfig {
    /// Internal method: sets up initialization
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        let init = unsafe {
            INTERNAL_CONFIG_INITIALIZER
                .take()
                .expect("Should be initialized only once")
        };
        init.unwrap_or_default()
    }

    /// Initialize with the given command line configuration. Should only be called once, and should
    /// only be called from `main`.
    #[allow(static_mut_refs)]
    pub fn initialize(command_line_config: Vec<CommandLineAnalysisConfig>) {
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(command_line_config.into())) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<AnalysisConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store
    pub static ref CONFIG: AnalysisConfig = AnalysisConfig::from_initialized();
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Analysis configuration parameters
pub enum CommandLineAnalysisConfig {
    DisableUnknownPointerWarnings,
    DisallowUnresolvedCallTargets,
    DumpContextTreeDotFiles,
    EnableDebugPrintStatesAtJoin,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            warn_on_unknown_pointer: true,
            max_fixpoint_pass_multiplier: 64,
            allow_unresolved_call_targets: true,
            dump_context_tree_dot_files: false,
            debug_print_states_at_join: false,
        }
    }
}

impl From<Vec<CommandLineAnalysisConfig>> for AnalysisConfig {
    fn from(v: Vec<CommandLineAnalysisConfig>) -> Self {
        use CommandLineAnalysisConfig::*;
        let mut r = AnalysisConfig::default();
        for v in v {
            match v {
                DisableUnknownPointerWarnings => {
                    r.warn_on_unknown_pointer = false;
                }
                DisallowUnresolvedCallTargets => {
                    r.allow_unresolved_call_targets = false;
                }
                DumpContextTreeDotFiles => {
                    r.dump_context_tree_dot_files = true;
                }
                EnableDebugPrintStatesAtJoin => {
                    r.debug_print_states_at_join = true;
                }
            }
        }
        r
    }
}
