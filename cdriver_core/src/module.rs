use std::collections::BTreeSet;
use std::path::Path;

use serde_yaml::Value;

use crate::project::Dependency;
use crate::resolver::ResolveContext;
use crate::Result;

/// JSON blob written to / read from the state document for a single module.
/// Kind-specific; the state engine injects the `"type"` discriminator.
pub type ModuleState = serde_json::Value;

/// Fields common to every module kind, matching the teacher's pattern of a
/// shared record embedded in each variant rather than a deep inheritance
/// tree (see `shipcat_definitions::structs::Metadata` style plain structs).
#[derive(Clone, Debug)]
pub struct SharedModule {
    pub infra_name: String,
    pub name: String,
    pub kind: String,
    pub source: String,
    pub backend_name: String,
    pub inputs: Value,
    pub dependencies: Vec<Dependency>,
    pub expected_outputs: BTreeSet<String>,
}

impl SharedModule {
    pub fn key(&self) -> String {
        format!("{}.{}", self.infra_name, self.name)
    }
}

/// The capability set the core requires of every module kind.
///
/// `ReplaceMarkers` takes an explicit `ResolveContext` rather than reaching
/// through an owning `ProjectPtr` back-reference: Modules live inside the
/// `Project`'s arena (a `BTreeMap`), so a true back-pointer would alias the
/// map while it is being mutated. Passing the marker stores and the set of
/// known module keys by reference keeps the same semantics without unsafe
/// code (documented in DESIGN.md).
pub trait Module: std::fmt::Debug + Send + Sync {
    fn shared(&self) -> &SharedModule;
    fn shared_mut(&mut self) -> &mut SharedModule;

    fn key(&self) -> String {
        self.shared().key()
    }
    fn name(&self) -> &str {
        &self.shared().name
    }
    fn infra_name(&self) -> &str {
        &self.shared().infra_name
    }
    fn kind(&self) -> &str {
        &self.shared().kind
    }
    fn dependencies(&self) -> &[Dependency] {
        &self.shared().dependencies
    }
    fn expected_outputs(&self) -> &BTreeSet<String> {
        &self.shared().expected_outputs
    }

    /// Rewrites this module's `Inputs` in place, resolving YAML-splice
    /// markers first and then remote-state markers, appending a
    /// `Dependency` edge for every remote-state reference encountered.
    fn replace_markers(&mut self, ctx: &ResolveContext) -> Result<()> {
        crate::resolver::resolve_module_inputs(self.shared_mut(), ctx)
    }

    /// Kind-specific blob persisted into the state document.
    fn get_state(&self) -> ModuleState;

    /// Kind-specific subset of configuration used to decide "has changed".
    fn get_diff_data(&self) -> serde_json::Value;

    /// Emits generated provisioning-tool input files under
    /// `<code_cache_dir>/<infra>/<name>/`.
    fn build(&self, code_cache_dir: &Path) -> Result<()>;

    /// Applies the module via the downstream provisioning tool.
    fn apply(&self) -> Result<()>;

    /// Dry-run plan via the downstream provisioning tool.
    fn plan(&self) -> Result<()>;

    /// Destroys previously-applied resources for this module.
    fn destroy(&self) -> Result<()>;
}
