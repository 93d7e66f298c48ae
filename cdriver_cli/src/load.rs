use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use cdriver_core::{Infrastructure, MarkerStore, Project, Registry};

use crate::template;
use crate::Result;

#[derive(Debug, Fail)]
enum LoadErrKind {
    #[fail(display = "backend '{}' has no 'type' field", _0)]
    MissingBackendType(String),
    #[fail(display = "module '{}' has no 'type' field", _0)]
    MissingModuleType(String),
    #[fail(display = "infrastructure '{}' references unknown backend '{}'", _0, _1)]
    UnknownBackendRef(String, String),
}

/// Top-level shape of a root project file: a name -> config map of backends
/// and a name -> config map of infrastructures, mirroring
/// `shipcat_definitions::filebacked`'s pattern of a directory of named,
/// individually-parsed YAML documents, collapsed here into one root
/// document plus optional per-infrastructure module directories.
#[derive(Deserialize)]
struct RootDoc {
    #[serde(default)]
    backends: BTreeMap<String, serde_yaml::Value>,
    infrastructures: BTreeMap<String, RawInfraSpec>,
}

#[derive(Deserialize)]
struct RawInfraSpec {
    #[serde(default = "default_backend_name")]
    backend: String,
    #[serde(default = "default_template_dir")]
    template: PathBuf,
    #[serde(default)]
    modules: BTreeMap<String, serde_yaml::Value>,
}

fn default_backend_name() -> String {
    "local".to_string()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Reads the root project file at `root_file`, renders it as a tera
/// template against the process environment, parses the result as YAML,
/// instantiates every declared backend and module via `registry`, mints
/// remote-state and YAML-splice markers found inline, and returns a
/// `Project` whose `prepare_modules` has already run.
pub fn load_project(
    root_file: &Path,
    working_dir: &Path,
    code_cache_dir: &Path,
    registry: &Registry,
) -> Result<Project> {
    let raw = fs::read_to_string(root_file)?;
    let mut vars = BTreeMap::new();
    for (k, v) in std::env::vars() {
        vars.insert(format!("env_{}", k), v);
    }
    let rendered = template::expand(&raw, &vars)?;
    let doc: RootDoc = serde_yaml::from_str(&rendered)?;

    let mut project = Project::new(working_dir, code_cache_dir);

    for (name, spec) in &doc.backends {
        let kind = spec
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoadErrKind::MissingBackendType(name.clone()))?;
        let factory = registry.backend_factory(kind)?;
        let backend = factory.new_from_config(name, spec)?;
        project.backends.insert(name.clone(), backend);
    }

    for (infra_name, infra_spec) in &doc.infrastructures {
        if !project.backends.contains_key(&infra_spec.backend) {
            return Err(
                LoadErrKind::UnknownBackendRef(infra_name.clone(), infra_spec.backend.clone()).into(),
            );
        }
        project.add_infrastructure(Infrastructure {
            name: infra_name.clone(),
            template_source: working_dir.join(&infra_spec.template),
            backend_name: infra_spec.backend.clone(),
        });
    }

    for (infra_name, infra_spec) in &doc.infrastructures {
        for (module_name, raw_spec) in collect_modules(infra_name, infra_spec, working_dir)? {
            let mut spec = raw_spec;
            mint_inline_markers(&mut spec, &mut project.remote_markers, &mut project.splice_markers);
            let kind = spec
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| LoadErrKind::MissingModuleType(format!("{}.{}", infra_name, module_name)))?
                .to_string();
            let factory = registry.module_factory(&kind)?;
            let module = factory.new_from_config(infra_name, &module_name, &infra_spec.backend, &spec)?;
            project.add_module(module)?;
        }
    }

    project.prepare_modules()?;
    Ok(project)
}

/// Either the inline `modules:` map, or (when absent) every `*.yml`/`*.yaml`
/// file directly under the infrastructure's template directory, walked with
/// `walkdir`, file stem taken as the module name.
fn collect_modules(
    infra_name: &str,
    infra: &RawInfraSpec,
    working_dir: &Path,
) -> Result<Vec<(String, serde_yaml::Value)>> {
    if !infra.modules.is_empty() {
        return Ok(infra.modules.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    }

    let dir = working_dir.join(&infra.template);
    let mut out = Vec::new();
    for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yml" || e == "yaml")
            .unwrap_or(false);
        if !entry.file_type().is_file() || !is_yaml {
            continue;
        }
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        let raw = fs::read_to_string(path)?;
        out.push((name, serde_yaml::from_str(&raw)?));
    }
    if out.is_empty() {
        warn!("infrastructure '{}' declares no modules", infra_name);
    }
    Ok(out)
}

/// Recognises two user-facing marker conventions inline in a module's raw
/// spec and mints the corresponding sentinel, matching the dotted
/// `"this.module"` / `"infra.module"` convention of
/// `original_source/pkg/modules/terraform/common/utils.go`'s `readDeps`,
/// extended with the output name: `"${infra.module.output}"` mints a
/// remote-state marker; a one-key mapping `{"$splice": <value>}` mints a
/// YAML-splice marker in place of the whole mapping.
fn mint_inline_markers(value: &mut serde_yaml::Value, remote: &mut MarkerStore, splice: &mut MarkerStore) {
    match value {
        serde_yaml::Value::Mapping(map) if is_splice_block(map) => {
            let mut payload = map
                .get(&serde_yaml::Value::String("$splice".to_string()))
                .cloned()
                .unwrap_or(serde_yaml::Value::Null);
            // The payload may itself contain remote-state references (or
            // further splices); mint those markers before registering the
            // payload, so they survive splice substitution intact and are
            // still present in the tree `resolve_remote_refs` later scans.
            mint_inline_markers(&mut payload, remote, splice);
            let sentinel = splice.register_splice(payload);
            *value = serde_yaml::Value::String(sentinel);
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                mint_inline_markers(v, remote, splice);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                mint_inline_markers(v, remote, splice);
            }
        }
        serde_yaml::Value::String(s) => {
            if let Some(rewritten) = mint_remote_refs(s, remote) {
                *value = serde_yaml::Value::String(rewritten);
            }
        }
        _ => {}
    }
}

fn is_splice_block(map: &serde_yaml::Mapping) -> bool {
    map.len() == 1 && map.contains_key(&serde_yaml::Value::String("$splice".to_string()))
}

fn mint_remote_refs(s: &str, remote: &mut MarkerStore) -> Option<String> {
    let re = Regex::new(r"\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)\}").unwrap();
    if !re.is_match(s) {
        return None;
    }
    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        let sentinel = remote.register_remote(&cap[1], &cap[2], &cap[3]);
        result = result.replace(&cap[0], &sentinel);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdriver_core::registry::Registry;
    use tempdir::TempDir;

    #[test]
    fn loads_a_project_with_a_dependency() {
        let tmp = TempDir::new("cdriver-load").unwrap();
        let root = tmp.path().join("cdriver.yml");
        fs::write(
            &root,
            r#"
backends:
  default:
    type: local
infrastructures:
  infra1:
    backend: default
    modules:
      a:
        type: terraform-module
        source: ./modules/a
        inputs:
          name: widget
      b:
        type: terraform-module
        source: ./modules/b
        inputs:
          ref: "${this.a.out}"
"#,
        )
        .unwrap();

        let registry = Registry::with_builtins();
        let project = load_project(&root, tmp.path(), &tmp.path().join("code"), &registry).unwrap();
        assert!(project.modules.contains_key("infra1.a"));
        assert!(project.modules.contains_key("infra1.b"));
        assert_eq!(project.modules["infra1.b"].dependencies().len(), 1);
        assert_eq!(project.modules["infra1.b"].dependencies()[0].target_key, "infra1.a");
    }

    #[test]
    fn remote_ref_nested_in_a_splice_payload_still_becomes_a_dependency() {
        let tmp = TempDir::new("cdriver-load").unwrap();
        let root = tmp.path().join("cdriver.yml");
        fs::write(
            &root,
            r#"
backends:
  default:
    type: local
infrastructures:
  infra1:
    backend: default
    modules:
      a:
        type: terraform-module
        source: ./modules/a
        inputs:
          name: widget
      b:
        type: terraform-module
        source: ./modules/b
        inputs:
          $splice:
            ref: "${this.a.out}"
"#,
        )
        .unwrap();

        let registry = Registry::with_builtins();
        let project = load_project(&root, tmp.path(), &tmp.path().join("code"), &registry).unwrap();
        assert_eq!(project.modules["infra1.b"].dependencies().len(), 1);
        assert_eq!(project.modules["infra1.b"].dependencies()[0].target_key, "infra1.a");
    }

    #[test]
    fn missing_backend_type_is_an_error() {
        let tmp = TempDir::new("cdriver-load").unwrap();
        let root = tmp.path().join("cdriver.yml");
        fs::write(
            &root,
            r#"
backends:
  default: {}
infrastructures: {}
"#,
        )
        .unwrap();

        let registry = Registry::with_builtins();
        assert!(load_project(&root, tmp.path(), &tmp.path().join("code"), &registry).is_err());
    }
}
