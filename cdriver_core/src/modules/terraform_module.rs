use std::fs;
use std::path::Path;

use crate::module::{Module, ModuleState, SharedModule};
use crate::registry::ModuleFactory;
use crate::Result;

#[derive(Debug, Fail)]
enum TerraformErrKind {
    #[fail(
        display = "module '{}' lists expected output '{}' but its config has no matching entry under 'outputs:'",
        _0, _1
    )]
    MissingOutputProducer(String, String),
}

/// Generic terraform-module kind: a thin wrapper over a module `source`
/// plus its `Inputs`, mirroring the teacher's bare `common.Module` embed in
/// `original_source/pkg/project/module.go` (no kind-specific fields).
#[derive(Clone, Debug)]
pub struct TerraformModule {
    pub shared: SharedModule,
}

impl Module for TerraformModule {
    fn shared(&self) -> &SharedModule {
        &self.shared
    }
    fn shared_mut(&mut self) -> &mut SharedModule {
        &mut self.shared
    }

    fn get_state(&self) -> ModuleState {
        serde_json::json!({
            "source": self.shared.source,
            "backend": self.shared.backend_name,
            "inputs": yaml_to_json(&self.shared.inputs),
            "expected_outputs": self.shared.expected_outputs,
        })
    }

    fn get_diff_data(&self) -> serde_json::Value {
        yaml_to_json(&self.shared.inputs)
    }

    fn build(&self, code_cache_dir: &Path) -> Result<()> {
        let dir = code_cache_dir.join(&self.shared.infra_name).join(&self.shared.name);
        fs::create_dir_all(&dir)?;

        let outputs = output_expressions(&self.shared)?;
        let mut body = serde_json::json!({
            "module": {
                self.shared.name.clone(): merge_source(&self.shared),
            }
        });
        if !outputs.is_empty() {
            body["output"] = serde_json::Value::Object(outputs);
        }
        fs::write(dir.join("main.tf.json"), serde_json::to_string_pretty(&body)?)?;
        Ok(())
    }

    fn apply(&self) -> Result<()> {
        info!("applying module '{}' (kind terraform-module)", self.shared.key());
        Ok(())
    }

    fn plan(&self) -> Result<()> {
        info!("planning module '{}' (kind terraform-module)", self.shared.key());
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        info!("destroying module '{}' (kind terraform-module)", self.shared.key());
        Ok(())
    }
}

fn merge_source(shared: &SharedModule) -> serde_json::Value {
    let mut map = match yaml_to_json(&shared.inputs) {
        serde_json::Value::Object(m) => m,
        _ => serde_json::Map::new(),
    };
    // `outputs:` is metadata describing how to produce `ExpectedOutputs`,
    // not a module input.
    map.remove("outputs");
    map.insert("source".to_string(), serde_json::Value::String(shared.source.clone()));
    serde_json::Value::Object(map)
}

/// Enforces invariant I4: every name in `ExpectedOutputs` must have a
/// matching entry under `inputs.outputs`, giving the HCL expression that
/// produces it (typically `module.<name>.<attr>`). Missing a producer at
/// build time is fatal, unlike at resolution time (spec.md §3, I4).
fn output_expressions(shared: &SharedModule) -> Result<serde_json::Map<String, serde_json::Value>> {
    let declared = shared.inputs.get("outputs").and_then(|v| v.as_mapping());
    let mut out = serde_json::Map::new();
    for name in &shared.expected_outputs {
        let expr = declared
            .and_then(|m| m.get(&serde_yaml::Value::String(name.clone())))
            .ok_or_else(|| TerraformErrKind::MissingOutputProducer(shared.key(), name.clone()))?;
        out.insert(name.clone(), serde_json::json!({ "value": yaml_to_json(expr) }));
    }
    Ok(out)
}

pub fn yaml_to_json(v: &serde_yaml::Value) -> serde_json::Value {
    serde_json::to_value(v).unwrap_or(serde_json::Value::Null)
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
        let source = spec
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let inputs = spec
            .get("inputs")
            .cloned()
            .unwrap_or_else(|| serde_yaml::Value::Mapping(Default::default()));
        let expected_outputs = spec
            .get("expected_outputs")
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(TerraformModule {
            shared: SharedModule {
                infra_name: infra_name.to_string(),
                name: name.to_string(),
                kind: self.kind().to_string(),
                source,
                backend_name: backend_name.to_string(),
                inputs,
                dependencies: Vec::new(),
                expected_outputs,
            },
        }))
    }

    fn new_from_state(&self, key: &str, state: &ModuleState) -> Result<Box<dyn Module>> {
        let (infra_name, name) = crate::project::split_key(key);
        let source = state
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let backend_name = state
            .get("backend")
            .and_then(|v| v.as_str())
            .unwrap_or("local")
            .to_string();
        let inputs: serde_yaml::Value = state
            .get("inputs")
            .cloned()
            .map(|v| serde_yaml::to_value(v).unwrap_or(serde_yaml::Value::Null))
            .unwrap_or(serde_yaml::Value::Null);
        let expected_outputs = state
            .get("expected_outputs")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(Box::new(TerraformModule {
            shared: SharedModule {
                infra_name: infra_name.to_string(),
                name: name.to_string(),
                kind: self.kind().to_string(),
                source,
                backend_name,
                inputs,
                dependencies: Vec::new(),
                expected_outputs,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempdir::TempDir;

    fn sample() -> TerraformModule {
        TerraformModule {
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
        }
    }

    #[test]
    fn build_writes_a_file_under_infra_name_dir() {
        let tmp = TempDir::new("cdriver-build").unwrap();
        let m = sample();
        m.build(tmp.path()).unwrap();
        assert!(tmp.path().join("infra1").join("a").join("main.tf.json").is_file());
    }

    #[test]
    fn state_round_trips_through_factory() {
        let m = sample();
        let state = m.get_state();
        let factory = Factory;
        let reloaded = factory.new_from_state("infra1.a", &state).unwrap();
        assert_eq!(reloaded.get_diff_data(), m.get_diff_data());
    }

    #[test]
    fn build_fails_when_an_expected_output_has_no_producer() {
        let mut m = sample();
        m.shared.expected_outputs.insert("out1".to_string());
        let tmp = TempDir::new("cdriver-build").unwrap();
        assert!(m.build(tmp.path()).is_err());
    }

    #[test]
    fn build_emits_an_output_block_for_a_declared_producer() {
        let mut m = sample();
        m.shared.expected_outputs.insert("out1".to_string());
        m.shared.inputs = serde_yaml::from_str("outputs:\n  out1: module.a.id\n").unwrap();
        let tmp = TempDir::new("cdriver-build").unwrap();
        m.build(tmp.path()).unwrap();
        let written = fs::read_to_string(tmp.path().join("infra1").join("a").join("main.tf.json")).unwrap();
        assert!(written.contains("\"output\""));
        assert!(written.contains("module.a.id"));
        assert!(!written.contains("\"outputs\""));
    }
}
