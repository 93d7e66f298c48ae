use crate::backend::Backend;
use crate::module::Module;
use crate::registry::BackendFactory;
use crate::Result;

#[derive(Debug, Fail)]
enum S3ErrKind {
    #[fail(display = "s3 backend '{}' is missing the 'bucket' option", _0)]
    MissingBucket(String),
    #[fail(display = "s3 backend '{}' is missing the 'region' option", _0)]
    MissingRegion(String),
}

/// Backend emitting a Terraform `s3` backend block plus a
/// `terraform_remote_state` data source, grounded in
/// `original_source/cmd/cdev/includes.go`'s `pkg/backend/s3` import.
#[derive(Clone, Debug)]
pub struct S3Backend {
    name: String,
    bucket: String,
    region: String,
    key_prefix: String,
}

impl Backend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "s3"
    }

    fn get_backend_hcl(&self, module: &dyn Module) -> Result<Vec<u8>> {
        let key = format!("{}/{}.tfstate", self.key_prefix, module.key());
        Ok(format!(
            "terraform {{\n  backend \"s3\" {{\n    bucket = \"{}\"\n    key    = \"{}\"\n    region = \"{}\"\n  }}\n}}\n",
            self.bucket, key, self.region
        )
        .into_bytes())
    }

    fn get_remote_state_hcl(&self, module: &dyn Module) -> Result<Vec<u8>> {
        let key = format!("{}/{}.tfstate", self.key_prefix, module.key());
        Ok(format!(
            "data \"terraform_remote_state\" \"{}-{}\" {{\n  backend = \"s3\"\n  config = {{\n    bucket = \"{}\"\n    key    = \"{}\"\n    region = \"{}\"\n  }}\n}}\n",
            module.infra_name(), module.name(), self.bucket, key, self.region
        )
        .into_bytes())
    }
}

pub struct Factory;

impl BackendFactory for Factory {
    fn kind(&self) -> &str {
        "s3"
    }

    fn new_from_config(&self, name: &str, spec: &serde_yaml::Value) -> Result<Box<dyn Backend>> {
        let bucket = spec
            .get("bucket")
            .and_then(|v| v.as_str())
            .ok_or_else(|| S3ErrKind::MissingBucket(name.to_string()))?
            .to_string();
        let region = spec
            .get("region")
            .and_then(|v| v.as_str())
            .ok_or_else(|| S3ErrKind::MissingRegion(name.to_string()))?
            .to_string();
        let key_prefix = spec
            .get("keyPrefix")
            .and_then(|v| v.as_str())
            .unwrap_or("cdriver")
            .to_string();
        Ok(Box::new(S3Backend {
            name: name.to_string(),
            bucket,
            region,
            key_prefix,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::SharedModule;
    use crate::modules::terraform_module::TerraformModule;
    use std::collections::BTreeSet;

    #[test]
    fn missing_bucket_is_an_error() {
        let factory = Factory;
        let spec: serde_yaml::Value = serde_yaml::from_str("region: us-east-1\n").unwrap();
        assert!(factory.new_from_config("default", &spec).is_err());
    }

    #[test]
    fn backend_hcl_contains_module_key() {
        let factory = Factory;
        let spec: serde_yaml::Value =
            serde_yaml::from_str("bucket: my-bucket\nregion: us-east-1\n").unwrap();
        let backend = factory.new_from_config("default", &spec).unwrap();
        let module = TerraformModule {
            shared: SharedModule {
                infra_name: "infra1".into(),
                name: "a".into(),
                kind: "terraform-module".into(),
                source: "s".into(),
                backend_name: "default".into(),
                inputs: serde_yaml::Value::Null,
                dependencies: vec![],
                expected_outputs: BTreeSet::new(),
            },
        };
        let hcl = String::from_utf8(backend.get_backend_hcl(&module).unwrap()).unwrap();
        assert!(hcl.contains("infra1.a"));
    }
}
