use std::path::PathBuf;
use std::sync::Mutex;

use cdriver_core::module::{Module, ModuleState, SharedModule};
use cdriver_core::modules::terraform_module;
use cdriver_core::registry::ModuleFactory;
use cdriver_core::Result;

use crate::process;

/// Wraps a `"terraform-module"` kind's code generation with a real
/// invocation of the `terraform` binary via `process::run`, mirroring the
/// teacher's own pattern of shelling out to an external binary and
/// surfacing its stderr on failure (see `process::run`'s grounding). The
/// module directory is recorded at `build` time since `apply`/`plan`/
/// `destroy` take no path argument.
#[derive(Debug)]
pub struct TerraformCliModule {
    inner: Box<dyn Module>,
    dir: Mutex<Option<PathBuf>>,
}

impl TerraformCliModule {
    pub fn new(inner: Box<dyn Module>) -> Self {
        TerraformCliModule { inner, dir: Mutex::new(None) }
    }

    fn built_dir(&self) -> Result<PathBuf> {
        self.dir
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| failure::err_msg(format!("module '{}' applied before being built", self.inner.key())))
    }
}

impl Module for TerraformCliModule {
    fn shared(&self) -> &SharedModule {
        self.inner.shared()
    }
    fn shared_mut(&mut self) -> &mut SharedModule {
        self.inner.shared_mut()
    }

    fn get_state(&self) -> ModuleState {
        self.inner.get_state()
    }

    fn get_diff_data(&self) -> serde_json::Value {
        self.inner.get_diff_data()
    }

    fn build(&self, code_cache_dir: &std::path::Path) -> Result<()> {
        self.inner.build(code_cache_dir)?;
        let dir = code_cache_dir.join(self.inner.infra_name()).join(self.inner.name());
        *self.dir.lock().unwrap() = Some(dir);
        Ok(())
    }

    fn apply(&self) -> Result<()> {
        let dir = self.built_dir()?;
        process::run("terraform", &["init", "-input=false"], &dir)?;
        process::run("terraform", &["apply", "-auto-approve", "-input=false"], &dir)?;
        Ok(())
    }

    fn plan(&self) -> Result<()> {
        let dir = self.built_dir()?;
        process::run("terraform", &["init", "-input=false"], &dir)?;
        process::run("terraform", &["plan", "-input=false"], &dir)?;
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        let dir = self.built_dir()?;
        process::run("terraform", &["destroy", "-auto-approve", "-input=false"], &dir)?;
        Ok(())
    }
}

pub struct Factory;

impl ModuleFactory for Factory {
    fn kind(&self) -> &str {
        "terraform-module"
    }

    fn new_from_config(
        &self,
        infra_name: &str,
        name: &str,
        backend_name: &str,
        spec: &serde_yaml::Value,
    ) -> Result<Box<dyn Module>> {
        let inner = terraform_module::Factory.new_from_config(infra_name, name, backend_name, spec)?;
        Ok(Box::new(TerraformCliModule::new(inner)))
    }

    fn new_from_state(&self, key: &str, state: &ModuleState) -> Result<Box<dyn Module>> {
        let inner = terraform_module::Factory.new_from_state(key, state)?;
        Ok(Box::new(TerraformCliModule::new(inner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempdir::TempDir;

    fn sample_inner() -> Box<dyn Module> {
        Box::new(terraform_module::TerraformModule {
            shared: SharedModule {
                infra_name: "infra1".into(),
                name: "a".into(),
                kind: "terraform-module".into(),
                source: "./modules/a".into(),
                backend_name: "local".into(),
                inputs: serde_yaml::Value::String("x".into()),
                dependencies: vec![],
                expected_outputs: BTreeSet::new(),
            },
        })
    }

    #[test]
    fn apply_before_build_is_an_error() {
        let m = TerraformCliModule::new(sample_inner());
        assert!(m.apply().is_err());
    }

    #[test]
    fn build_records_the_module_directory() {
        let m = TerraformCliModule::new(sample_inner());
        let tmp = TempDir::new("cdriver-cli-module").unwrap();
        m.build(tmp.path()).unwrap();
        assert_eq!(*m.dir.lock().unwrap(), Some(tmp.path().join("infra1").join("a")));
    }

    #[test]
    fn state_and_diff_data_delegate_to_the_wrapped_module() {
        let m = TerraformCliModule::new(sample_inner());
        assert_eq!(m.get_diff_data(), serde_json::Value::String("x".to_string()));
    }
}
