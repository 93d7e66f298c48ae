use std::collections::BTreeMap;

use crate::backend::Backend;
use crate::module::{Module, ModuleState};
use crate::Result;

/// `UnknownKind` — registry miss; fatal at the call site (spec.md §7).
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum RErrKind {
    #[fail(display = "unknown module kind '{}'", _0)]
    UnknownModuleKind(String),
    #[fail(display = "unknown backend kind '{}'", _0)]
    UnknownBackendKind(String),
}

/// Produces a fresh `Module` for a kind, either from the declarative
/// configuration tree or from a persisted state blob.
pub trait ModuleFactory: Send + Sync {
    fn kind(&self) -> &str;

    fn new_from_config(
        &self,
        infra_name: &str,
        name: &str,
        backend_name: &str,
        spec: &serde_yaml::Value,
    ) -> Result<Box<dyn Module>>;

    fn new_from_state(&self, key: &str, state: &ModuleState) -> Result<Box<dyn Module>>;
}

/// Produces a fresh `Backend` for a kind from its declarative configuration.
pub trait BackendFactory: Send + Sync {
    fn kind(&self) -> &str;

    fn new_from_config(&self, name: &str, spec: &serde_yaml::Value) -> Result<Box<dyn Backend>>;
}

/// Name -> factory tables for module kinds and backend kinds.
///
/// Registration happens once at process init; lookup is read-only
/// thereafter, matching spec.md §4.1.
#[derive(Default)]
pub struct Registry {
    modules: BTreeMap<String, Box<dyn ModuleFactory>>,
    backends: BTreeMap<String, Box<dyn BackendFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register_module_kind(&mut self, factory: Box<dyn ModuleFactory>) {
        self.modules.insert(factory.kind().to_string(), factory);
    }

    pub fn register_backend_kind(&mut self, factory: Box<dyn BackendFactory>) {
        self.backends.insert(factory.kind().to_string(), factory);
    }

    pub fn module_factory(&self, kind: &str) -> Result<&dyn ModuleFactory> {
        self.modules
            .get(kind)
            .map(|b| b.as_ref())
            .ok_or_else(|| RErrKind::UnknownModuleKind(kind.to_string()).into())
    }

    pub fn backend_factory(&self, kind: &str) -> Result<&dyn BackendFactory> {
        self.backends
            .get(kind)
            .map(|b| b.as_ref())
            .ok_or_else(|| RErrKind::UnknownBackendKind(kind.to_string()).into())
    }

    /// Populates a registry with the module and backend kinds this crate
    /// ships out of the box. Callers (e.g. the CLI) may register additional
    /// kinds before using the registry.
    pub fn with_builtins() -> Self {
        let mut reg = Registry::new();
        reg.register_module_kind(Box::new(crate::modules::terraform_module::Factory));
        reg.register_module_kind(Box::new(crate::modules::kubernetes::Factory));
        reg.register_backend_kind(Box::new(crate::backends::local::Factory));
        reg.register_backend_kind(Box::new(crate::backends::s3::Factory));
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_an_error() {
        let reg = Registry::with_builtins();
        assert!(reg.module_factory("nonexistent").is_err());
        assert!(reg.backend_factory("nonexistent").is_err());
        assert!(reg.module_factory("terraform-module").is_ok());
        assert!(reg.backend_factory("local").is_ok());
    }
}
