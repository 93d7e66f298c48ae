use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::module::{Module, ModuleState, SharedModule};
use crate::modules::terraform_module::yaml_to_json;
use crate::registry::ModuleFactory;
use crate::Result;

#[derive(Debug, Fail)]
enum KubernetesErrKind {
    #[fail(display = "kubernetes module has no outputs, you cannot use references to its remote state in other modules")]
    UnexpectedOutputs,
    #[fail(display = "the kubernetes module must contain at least one manifest")]
    NoManifests,
}

/// `"kubernetes-manifests"` module kind, grounded directly in
/// `original_source/pkg/modules/terraform/kubernetes/main.go`: one or more
/// already-expanded YAML manifest documents provisioned via a
/// `kubernetes_manifest` resource per document, with no outputs of its own.
#[derive(Clone, Debug)]
pub struct KubernetesModule {
    pub shared: SharedModule,
    pub provider_config_path: String,
}

impl Module for KubernetesModule {
    fn shared(&self) -> &SharedModule {
        &self.shared
    }
    fn shared_mut(&mut self) -> &mut SharedModule {
        &mut self.shared
    }

    fn get_state(&self) -> ModuleState {
        serde_json::json!({
            "source": self.shared.source,
            "provider_config_path": self.provider_config_path,
            "inputs": yaml_to_json(&self.shared.inputs),
        })
    }

    fn get_diff_data(&self) -> serde_json::Value {
        yaml_to_json(&self.shared.inputs)
    }

    fn build(&self, code_cache_dir: &Path) -> Result<()> {
        let manifests = match self.shared.inputs.as_mapping() {
            Some(m) => m,
            None => return Err(KubernetesErrKind::NoManifests.into()),
        };
        let dir = code_cache_dir.join(&self.shared.infra_name).join(&self.shared.name);
        fs::create_dir_all(&dir)?;

        let mut resources = serde_json::Map::new();
        for (key, manifest) in manifests {
            let key = key.as_str().unwrap_or_default().to_string();
            resources.insert(
                key,
                serde_json::json!({
                    "provider": "kubernetes-alpha",
                    "manifest": yaml_to_json(manifest),
                }),
            );
        }
        let body = serde_json::json!({
            "provider": { "kubernetes-alpha": { "config_path": self.provider_config_path } },
            "resource": { "kubernetes_manifest": resources },
        });
        fs::write(dir.join("main.tf.json"), serde_json::to_string_pretty(&body)?)?;
        Ok(())
    }

    fn apply(&self) -> Result<()> {
        info!("applying module '{}' (kind kubernetes-manifests)", self.shared.key());
        Ok(())
    }

    fn plan(&self) -> Result<()> {
        info!("planning module '{}' (kind kubernetes-manifests)", self.shared.key());
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        info!("destroying module '{}' (kind kubernetes-manifests)", self.shared.key());
        Ok(())
    }
}

pub struct Factory;

impl ModuleFactory for Factory {
    fn kind(&self) -> &str {
        "kubernetes-manifests"
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
        let provider_config_path = spec
            .get("providerConfigPath")
            .and_then(|v| v.as_str())
            .unwrap_or("~/.kube/config")
            .to_string();
        let raw_manifests = spec
            .get("manifests")
            .and_then(|v| v.as_sequence())
            .cloned()
            .unwrap_or_default();
        if raw_manifests.is_empty() {
            return Err(KubernetesErrKind::NoManifests.into());
        }
        let mut inputs = BTreeMap::new();
        for (i, manifest) in raw_manifests.into_iter().enumerate() {
            inputs.insert(format!("{}_{}", name, i), manifest);
        }
        if spec.get("expected_outputs").and_then(|v| v.as_sequence()).map(|s| !s.is_empty()).unwrap_or(false) {
            return Err(KubernetesErrKind::UnexpectedOutputs.into());
        }

        let mut mapping = serde_yaml::Mapping::new();
        for (k, v) in inputs {
            mapping.insert(serde_yaml::Value::String(k), v);
        }

        Ok(Box::new(KubernetesModule {
            shared: SharedModule {
                infra_name: infra_name.to_string(),
                name: name.to_string(),
                kind: self.kind().to_string(),
                source,
                backend_name: backend_name.to_string(),
                inputs: serde_yaml::Value::Mapping(mapping),
                dependencies: Vec::new(),
                expected_outputs: Default::default(),
            },
            provider_config_path,
        }))
    }

    fn new_from_state(&self, key: &str, state: &ModuleState) -> Result<Box<dyn Module>> {
        let (infra_name, name) = crate::project::split_key(key);
        let source = state.get("source").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let provider_config_path = state
            .get("provider_config_path")
            .and_then(|v| v.as_str())
            .unwrap_or("~/.kube/config")
            .to_string();
        let inputs: serde_yaml::Value = state
            .get("inputs")
            .cloned()
            .map(|v| serde_yaml::to_value(v).unwrap_or(serde_yaml::Value::Null))
            .unwrap_or(serde_yaml::Value::Null);
        Ok(Box::new(KubernetesModule {
            shared: SharedModule {
                infra_name: infra_name.to_string(),
                name: name.to_string(),
                kind: self.kind().to_string(),
                source,
                backend_name: "local".to_string(),
                inputs,
                dependencies: Vec::new(),
                expected_outputs: Default::default(),
            },
            provider_config_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn rejects_expected_outputs() {
        let factory = Factory;
        let spec: serde_yaml::Value = serde_yaml::from_str(
            "source: ./manifests\nmanifests:\n  - foo: bar\nexpected_outputs: [out1]\n",
        )
        .unwrap();
        let err = factory.new_from_config("infra1", "a", "local", &spec);
        assert!(err.is_err());
    }

    #[test]
    fn build_writes_one_resource_per_manifest() {
        let factory = Factory;
        let spec: serde_yaml::Value = serde_yaml::from_str(
            "source: ./manifests\nmanifests:\n  - foo: bar\n  - baz: qux\n",
        )
        .unwrap();
        let module = factory.new_from_config("infra1", "a", "local", &spec).unwrap();
        let tmp = TempDir::new("cdriver-k8s-build").unwrap();
        module.build(tmp.path()).unwrap();
        assert!(tmp.path().join("infra1").join("a").join("main.tf.json").is_file());
    }
}
