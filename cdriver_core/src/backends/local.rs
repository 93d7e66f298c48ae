use crate::backend::Backend;
use crate::module::Module;
use crate::registry::BackendFactory;
use crate::Result;

/// No-op backend: no remote state block, no `terraform_remote_state`
/// reference. Used in tests and by standalone modules with no peers.
#[derive(Clone, Debug)]
pub struct LocalBackend {
    name: String,
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "local"
    }
    fn get_backend_hcl(&self, _module: &dyn Module) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
    fn get_remote_state_hcl(&self, _module: &dyn Module) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

pub struct Factory;

impl BackendFactory for Factory {
    fn kind(&self) -> &str {
        "local"
    }
    fn new_from_config(&self, name: &str, _spec: &serde_yaml::Value) -> Result<Box<dyn Backend>> {
        Ok(Box::new(LocalBackend { name: name.to_string() }))
    }
}
