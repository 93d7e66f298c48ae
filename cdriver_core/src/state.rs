use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Mutex;

use crate::config::Global;
use crate::diff::StructuredDiff;
use crate::grapher::Grapher;
use crate::module::Module;
use crate::project::{Infrastructure, Project};
use crate::registry::Registry;
use crate::Result;

#[derive(Debug, Fail)]
enum StateErrKind {
    #[fail(display = "saving project state: {}", _0)]
    StatePersistError(String),
    #[fail(display = "loading state: module '{}' has no 'type' field", _0)]
    MissingModuleType(String),
    #[fail(display = "no such module '{}' in state", _0)]
    UnknownModule(String),
}

/// On-disk shape of the state document (spec.md §6):
/// `{ "markers": {...}, "modules": { "<infra>.<name>": { "type": "<kind>", ... } } }`.
#[derive(Serialize, Deserialize, Default)]
struct StateDocument {
    #[serde(default)]
    markers: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    modules: BTreeMap<String, serde_json::Value>,
}

struct Inner {
    /// The reconstructed projection of the last successfully applied
    /// configuration. Modules here are built via each factory's
    /// `NewFromState`.
    project: Project,
    changed_modules: BTreeSet<String>,
    markers: BTreeMap<String, serde_json::Value>,
}

/// The persisted projection: loaded once at the start of plan/apply/destroy,
/// mutated incrementally during apply under a mutex, flushed after every
/// successful module application (spec.md §3, §4.6).
pub struct StateProject {
    inner: Mutex<Inner>,
    state_file_name: std::path::PathBuf,
}

impl StateProject {
    /// Ensures `state_cache_dir` exists and is empty (scratch area for
    /// destroy-path code generation), reads the state file if present, and
    /// reconstructs a sibling `Project` whose modules are built via
    /// `NewFromState`, re-running `prepare_modules` so dependency edges
    /// inside the state projection are populated (spec.md §4.6).
    pub fn load(global: &Global, registry: &Registry, desired: &Project) -> Result<Self> {
        if global.state_cache_dir.is_dir() {
            remove_dir_contents(&global.state_cache_dir)?;
        } else {
            fs::create_dir_all(&global.state_cache_dir)?;
        }

        let doc: StateDocument = if global.state_file_name.is_file() {
            let data = fs::read_to_string(&global.state_file_name)?;
            serde_json::from_str(&data)?
        } else {
            StateDocument::default()
        };

        let mut project = Project::new(global.working_dir.clone(), global.state_cache_dir.clone());
        // Infrastructures are not separately persisted; modules carry their
        // own infra name, so synthesize placeholder infrastructures for
        // every distinct infra name seen in the state file, inheriting the
        // desired project's template/backend if it still declares them.
        let mut infra_names: BTreeSet<String> = BTreeSet::new();
        for key in doc.modules.keys() {
            if let Some((infra, _)) = key.split_once('.') {
                infra_names.insert(infra.to_string());
            }
        }
        for name in infra_names {
            if let Some(infra) = desired.infrastructures.get(&name) {
                project.add_infrastructure(infra.clone());
            } else {
                project.add_infrastructure(Infrastructure {
                    name: name.clone(),
                    template_source: global.working_dir.clone(),
                    backend_name: "local".to_string(),
                });
            }
        }

        for (key, blob) in &doc.modules {
            let obj = blob
                .as_object()
                .ok_or_else(|| StateErrKind::MissingModuleType(key.clone()))?;
            let kind = obj
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| StateErrKind::MissingModuleType(key.clone()))?;
            let factory = registry.module_factory(kind)?;
            let module = factory.new_from_state(key, blob)?;
            project.modules.insert(key.clone(), module);
        }
        project.prepare_modules()?;

        Ok(StateProject {
            inner: Mutex::new(Inner {
                project,
                changed_modules: BTreeSet::new(),
                markers: doc.markers,
            }),
            state_file_name: global.state_file_name.clone(),
        })
    }

    /// Serializes the state document and writes it via a temp-file-then-
    /// rename, per the Design Notes' atomicity fix (spec.md §9).
    pub fn save_state(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let mut modules = BTreeMap::new();
        for (key, module) in &inner.project.modules {
            let mut blob = module.get_state();
            if let Some(obj) = blob.as_object_mut() {
                obj.insert("type".to_string(), serde_json::Value::String(module.kind().to_string()));
            }
            modules.insert(key.clone(), blob);
        }
        let doc = StateDocument {
            markers: inner.markers.clone(),
            modules,
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| StateErrKind::StatePersistError(e.to_string()))?;
        let tmp = tmp_path(&self.state_file_name);
        fs::write(&tmp, json).map_err(|e| StateErrKind::StatePersistError(e.to_string()))?;
        fs::rename(&tmp, &self.state_file_name)
            .map_err(|e| StateErrKind::StatePersistError(e.to_string()))?;
        Ok(())
    }

    /// Stores `module` both in `Modules` and `ChangedModules`, under the
    /// lock that also guards `CheckModuleChanges` reads, making the
    /// happens-before relation the Open Question in spec.md §9 asks for
    /// explicit in the type system.
    pub fn update_module(&self, module: Box<dyn Module>) {
        let mut inner = self.inner.lock().unwrap();
        let key = module.key();
        inner.project.modules.insert(key.clone(), module);
        inner.changed_modules.insert(key);
    }

    pub fn delete_module(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.project.modules.remove(key);
    }

    pub fn has_module(&self, key: &str) -> bool {
        self.inner.lock().unwrap().project.modules.contains_key(key)
    }

    pub fn module_keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().project.modules.keys().cloned().collect()
    }

    pub fn build_grapher(&self, max_parallel: usize, reverse: bool) -> Result<Grapher> {
        let inner = self.inner.lock().unwrap();
        Grapher::init(&inner.project, max_parallel, reverse)
    }

    /// Builds a module already reconstructed from the state document into
    /// `code_cache_dir` and destroys it. Used by the destroy path; the
    /// module's own `Source`/`Inputs` at the time of the last successful
    /// apply are what gets rebuilt, not the desired project's.
    pub fn build_and_destroy(&self, key: &str, code_cache_dir: &std::path::Path) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let module = inner
            .project
            .modules
            .get(key)
            .ok_or_else(|| StateErrKind::UnknownModule(key.to_string()))?;
        if let Err(e) = module.build(code_cache_dir) {
            error!("build failed for '{}', destroying anyway: {}", key, e);
        }
        module.destroy()
    }

    /// Returns the destruction-diff for a module present in state but
    /// absent from the desired project.
    pub fn destruction_diff(&self, key: &str, diff_helper: &dyn StructuredDiff) -> String {
        let inner = self.inner.lock().unwrap();
        match inner.project.modules.get(key) {
            Some(m) => diff_helper.diff(Some(&m.get_diff_data()), None, true),
            None => String::new(),
        }
    }

    /// Computes the diff string for `module` (a member of the desired
    /// project), per spec.md §4.6:
    /// - absent from state -> full-addition diff
    /// - non-empty structural diff -> that diff wins
    /// - else, any transitive dependency changed -> the "dependency-changed"
    ///   sentinel
    /// - else, empty string (no change)
    pub fn check_module_changes(
        &self,
        desired: &Project,
        module_key: &str,
        diff_helper: &dyn StructuredDiff,
    ) -> String {
        let module = match desired.modules.get(module_key) {
            Some(m) => m,
            None => return String::new(),
        };
        let inner = self.inner.lock().unwrap();
        let state_module = match inner.project.modules.get(module_key) {
            None => return diff_helper.diff(None, Some(&module.get_diff_data()), true),
            Some(m) => m,
        };
        let df = diff_helper.diff(Some(&state_module.get_diff_data()), Some(&module.get_diff_data()), true);
        if !df.is_empty() {
            return df;
        }
        for dep in module.dependencies() {
            if check_dependency_changed_recursive(&inner, desired, &dep.target_key, diff_helper) {
                return "There are changes in the module dependencies.".to_string();
            }
        }
        String::new()
    }
}

fn check_dependency_changed_recursive(
    inner: &Inner,
    desired: &Project,
    key: &str,
    diff_helper: &dyn StructuredDiff,
) -> bool {
    if inner.changed_modules.contains(key) {
        return true;
    }
    let desired_module = match desired.modules.get(key) {
        Some(m) => m,
        None => return false,
    };
    match inner.project.modules.get(key) {
        None => return true,
        Some(state_module) => {
            let df = diff_helper.diff(Some(&state_module.get_diff_data()), Some(&desired_module.get_diff_data()), true);
            if !df.is_empty() {
                return true;
            }
        }
    }
    for dep in desired_module.dependencies() {
        if check_dependency_changed_recursive(inner, desired, &dep.target_key, diff_helper) {
            return true;
        }
    }
    false
}

fn tmp_path(p: &std::path::Path) -> std::path::PathBuf {
    let mut s = p.as_os_str().to_os_string();
    s.push(".tmp");
    std::path::PathBuf::from(s)
}

fn remove_dir_contents(dir: &std::path::Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::PlainDiff;
    use crate::module::SharedModule;
    use crate::modules::terraform_module::TerraformModule;
    use crate::registry::Registry;
    use std::collections::BTreeSet as BSet;
    use tempdir::TempDir;

    fn module(infra: &str, name: &str) -> Box<dyn Module> {
        Box::new(TerraformModule {
            shared: SharedModule {
                infra_name: infra.to_string(),
                name: name.to_string(),
                kind: "terraform-module".into(),
                source: "s".into(),
                backend_name: "local".into(),
                inputs: serde_yaml::Value::String("v1".into()),
                dependencies: vec![],
                expected_outputs: BSet::new(),
            },
        })
    }

    #[test]
    fn save_then_load_round_trips_diff_data() {
        let tmp = TempDir::new("cdriver-state").unwrap();
        let mut global = Global::default();
        global.working_dir = tmp.path().to_path_buf();
        global.state_file_name = tmp.path().join("state.json");
        global.state_cache_dir = tmp.path().join("cache");

        let mut desired = Project::new(tmp.path(), tmp.path().join("code"));
        desired.add_infrastructure(Infrastructure {
            name: "infra1".into(),
            template_source: tmp.path().to_path_buf(),
            backend_name: "local".into(),
        });
        desired.add_module(module("infra1", "a")).unwrap();

        let registry = Registry::with_builtins();
        let sp = StateProject::load(&global, &registry, &desired).unwrap();
        sp.update_module(module("infra1", "a"));
        sp.save_state().unwrap();

        let sp2 = StateProject::load(&global, &registry, &desired).unwrap();
        let diff = PlainDiff;
        assert_eq!(sp2.check_module_changes(&desired, "infra1.a", &diff), "");
    }

    #[test]
    fn absent_module_is_full_addition() {
        let tmp = TempDir::new("cdriver-state").unwrap();
        let mut global = Global::default();
        global.state_file_name = tmp.path().join("state.json");
        global.state_cache_dir = tmp.path().join("cache");

        let mut desired = Project::new(tmp.path(), tmp.path().join("code"));
        desired.add_infrastructure(Infrastructure {
            name: "infra1".into(),
            template_source: tmp.path().to_path_buf(),
            backend_name: "local".into(),
        });
        desired.add_module(module("infra1", "a")).unwrap();

        let registry = Registry::with_builtins();
        let sp = StateProject::load(&global, &registry, &desired).unwrap();
        let diff = PlainDiff;
        assert_ne!(sp.check_module_changes(&desired, "infra1.a", &diff), "");
    }
}
