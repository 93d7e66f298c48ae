use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::Backend;
use crate::module::Module;
use crate::resolver::ResolveContext;
use crate::{markers::MarkerStore, Result};

/// A dependency edge: this module requires `output` from the module named
/// by `target_key` (`"infra.module"`). Edges are derived during marker
/// resolution, never user-authored (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dependency {
    pub target_key: String,
    pub output: String,
}

/// A named container for a set of modules sharing a template source.
#[derive(Clone, Debug)]
pub struct Infrastructure {
    pub name: String,
    pub template_source: PathBuf,
    pub backend_name: String,
}

#[derive(Debug, Fail)]
enum ProjectErrKind {
    #[fail(display = "duplicate module key '{}'", _0)]
    DuplicateModuleKey(String),
    #[fail(display = "dependency target '{}' does not exist", _0)]
    DependencyTargetMissing(String),
    #[fail(display = "unknown infrastructure '{}' referenced by module '{}'", _0, _1)]
    UnknownInfrastructure(String, String),
}

/// A set of Infrastructures, a flat map of Modules by key, the two Marker
/// Stores, a working directory, and the Backend registry (spec.md §3).
///
/// Modules and Infrastructures are owned here (an arena); cross-references
/// elsewhere in the crate are opaque `"infra.name"` keys, never raw
/// pointers, matching the Design Notes' cyclic-object-graph guidance.
pub struct Project {
    pub working_dir: PathBuf,
    pub infrastructures: BTreeMap<String, Infrastructure>,
    pub modules: BTreeMap<String, Box<dyn Module>>,
    pub backends: BTreeMap<String, Box<dyn Backend>>,
    pub splice_markers: MarkerStore,
    pub remote_markers: MarkerStore,
    pub code_cache_dir: PathBuf,
}

impl Project {
    pub fn new(working_dir: impl Into<PathBuf>, code_cache_dir: impl Into<PathBuf>) -> Self {
        Project {
            working_dir: working_dir.into(),
            infrastructures: BTreeMap::new(),
            modules: BTreeMap::new(),
            backends: BTreeMap::new(),
            splice_markers: MarkerStore::new(),
            remote_markers: MarkerStore::new(),
            code_cache_dir: code_cache_dir.into(),
        }
    }

    pub fn add_infrastructure(&mut self, infra: Infrastructure) {
        self.infrastructures.insert(infra.name.clone(), infra);
    }

    /// Inserts a module, enforcing invariant I1 (every key appears exactly
    /// once).
    pub fn add_module(&mut self, module: Box<dyn Module>) -> Result<()> {
        let key = module.key();
        if self.modules.contains_key(&key) {
            return Err(ProjectErrKind::DuplicateModuleKey(key).into());
        }
        if !self.infrastructures.contains_key(module.infra_name()) {
            return Err(
                ProjectErrKind::UnknownInfrastructure(module.infra_name().to_string(), key).into(),
            );
        }
        self.modules.insert(key, module);
        Ok(())
    }

    /// Invokes `ReplaceMarkers` on each module. Order doesn't matter: edge
    /// registration is a set-union and sentinels are globally unique
    /// (spec.md §4.3).
    pub fn prepare_modules(&mut self) -> Result<()> {
        let known_keys: std::collections::BTreeSet<String> = self.modules.keys().cloned().collect();
        let ctx = ResolveContext {
            splice_markers: &self.splice_markers,
            remote_markers: &self.remote_markers,
            known_module_keys: &known_keys,
        };
        for module in self.modules.values_mut() {
            module.replace_markers(&ctx)?;
        }
        // invariant I2: every Dependency target exists in Modules.
        for module in self.modules.values() {
            for dep in module.dependencies() {
                if !known_keys.contains(&dep.target_key) {
                    return Err(ProjectErrKind::DependencyTargetMissing(dep.target_key.clone()).into());
                }
            }
        }
        Ok(())
    }

    /// Asks every module to emit its generated code into
    /// `<code_cache_dir>/<infra>/<name>/`. Deterministic ordering is not
    /// required for correctness (spec.md §4.3).
    pub fn build(&self) -> Result<()> {
        for (key, module) in &self.modules {
            info!("Building module '{}'", key);
            module.build(&self.code_cache_dir)?;
        }
        Ok(())
    }

    pub fn module_dir(&self, key: &str) -> PathBuf {
        let (infra, name) = split_key(key);
        self.code_cache_dir.join(infra).join(name)
    }

    pub fn code_cache_dir(&self) -> &Path {
        &self.code_cache_dir
    }
}

pub fn split_key(key: &str) -> (&str, &str) {
    match key.split_once('.') {
        Some((a, b)) => (a, b),
        None => (key, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::terraform_module::TerraformModule;
    use crate::module::SharedModule;
    use std::collections::BTreeSet;

    fn dummy_module(infra: &str, name: &str) -> Box<dyn Module> {
        Box::new(TerraformModule {
            shared: SharedModule {
                infra_name: infra.to_string(),
                name: name.to_string(),
                kind: "terraform-module".to_string(),
                source: "./modules/dummy".to_string(),
                backend_name: "local".to_string(),
                inputs: serde_yaml::Value::Mapping(Default::default()),
                dependencies: vec![],
                expected_outputs: BTreeSet::new(),
            },
        })
    }

    #[test]
    fn duplicate_module_key_is_rejected() {
        let mut p = Project::new(".", ".cache");
        p.add_infrastructure(Infrastructure {
            name: "infra1".into(),
            template_source: "t".into(),
            backend_name: "local".into(),
        });
        p.add_module(dummy_module("infra1", "a")).unwrap();
        let err = p.add_module(dummy_module("infra1", "a"));
        assert!(err.is_err());
    }

    #[test]
    fn unknown_infra_is_rejected() {
        let mut p = Project::new(".", ".cache");
        let err = p.add_module(dummy_module("nope", "a"));
        assert!(err.is_err());
    }
}
