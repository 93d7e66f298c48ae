use std::path::PathBuf;

/// Process-wide configuration, assembled once by the CLI from parsed
/// arguments and threaded explicitly into the orchestrator.
///
/// The original design kept this as a `Global` singleton; we keep the name
/// for familiarity but pass it by reference everywhere instead of reading
/// ambient state, so the core stays testable without env var juggling.
#[derive(Clone, Debug)]
pub struct Global {
    /// Base path for resolving relative sources.
    pub working_dir: PathBuf,
    /// Path to the state document.
    pub state_file_name: PathBuf,
    /// Scratch directory for destroy code generation; purged on load.
    pub state_cache_dir: PathBuf,
    /// Directory generated provisioning-tool input files are written to.
    pub code_cache_dir: PathBuf,
    /// Worker count for Apply.
    pub max_parallel: usize,
    /// Treat every module as changed, bypassing the diff short-circuit.
    pub force: bool,
    /// Plan invokes the downstream tool's dry-run.
    pub show_terraform_plan: bool,
}

impl Default for Global {
    fn default() -> Self {
        Global {
            working_dir: PathBuf::from("."),
            state_file_name: PathBuf::from("cdriver.state.json"),
            state_cache_dir: PathBuf::from(".cdriver/state-cache"),
            code_cache_dir: PathBuf::from(".cdriver/code-cache"),
            max_parallel: 1,
            force: false,
            show_terraform_plan: false,
        }
    }
}

impl Global {
    pub fn new(working_dir: impl Into<PathBuf>, max_parallel: usize) -> Self {
        Global {
            working_dir: working_dir.into(),
            max_parallel: max_parallel.max(1),
            ..Default::default()
        }
    }
}
