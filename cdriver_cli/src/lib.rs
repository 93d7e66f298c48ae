#![allow(renamed_and_removed_lints)]
#![allow(non_snake_case)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

#[macro_use]
extern crate log;

extern crate loggerv;
extern crate regex;
extern crate tera;
extern crate walkdir;

extern crate colored;
extern crate similar;

#[macro_use]
extern crate failure;

extern crate cdriver_core;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use cdriver_core::{Backend, Dependency, Global, Infrastructure, Module, Project, Registry};

/// Reads a root project file, renders it as a template, and instantiates a
/// `Project` from the result via the registry.
pub mod load;

/// A thin wrapper over `tera`, rendering a whole project file as a template
/// before it is parsed as YAML, mirroring the teacher's own template
/// renderer.
pub mod template;

/// `similar` + `colored`-backed `StructuredDiff` implementation.
pub mod diff;

/// Subprocess runner invoking the downstream provisioning tool.
pub mod process;

/// Concrete, subprocess-backed module kinds registered on top of
/// `cdriver_core`'s in-memory stubs.
pub mod modules;

/// Initializes `log` via `loggerv` at the verbosity implied by a `-v` count.
pub fn init_logger(verbosity: u64) -> Result<()> {
    loggerv::Logger::new()
        .verbosity(verbosity)
        .level(true)
        .module_path(false)
        .init()
        .map_err(|e| failure::err_msg(e.to_string()))
}
