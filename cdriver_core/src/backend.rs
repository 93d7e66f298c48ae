use crate::module::Module;
use crate::Result;

/// Emits the provisioning-tool-specific backend configuration and
/// remote-state data source text for a module.
///
/// Kept deliberately string-oriented (no HCL AST) per spec.md's exclusion
/// of "HCL syntactic emission libraries" from the core's scope.
pub trait Backend: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> &str;

    /// The `backend { ... }` (or equivalent) block for this module.
    fn get_backend_hcl(&self, module: &dyn Module) -> Result<Vec<u8>>;

    /// The `data "terraform_remote_state" "..."` block a dependent module
    /// needs in order to read this module's published outputs.
    fn get_remote_state_hcl(&self, module: &dyn Module) -> Result<Vec<u8>>;
}
