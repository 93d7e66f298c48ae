/// No remote state; used for tests and purely local modules.
pub mod local;

/// S3-backed Terraform backend, grounded in the `includes.go` import list
/// of `original_source` (`pkg/backend/s3`).
pub mod s3;
