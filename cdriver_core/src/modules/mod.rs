/// A generic passthrough module kind whose diff-data is its resolved
/// `Inputs` tree, grounded in `original_source/pkg/project/module.go`'s
/// plain `Module` struct (no specialised behaviour beyond what `common`
/// provides).
pub mod terraform_module;

/// The `"kubernetes-manifests"` module kind, grounded directly in
/// `original_source/pkg/modules/terraform/kubernetes/main.go`.
pub mod kubernetes;
