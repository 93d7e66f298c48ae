/// Concrete, subprocess-backed module kinds the CLI registers on top of
/// `cdriver_core`'s in-memory stubs. The core kinds keep the same names so
/// that a registry built purely from `Registry::with_builtins()` (as in
/// `cdriver_core`'s own tests) stays hermetic, while the CLI's registry
/// overrides them with real invocations of the downstream tool.
pub mod terraform_cli;
