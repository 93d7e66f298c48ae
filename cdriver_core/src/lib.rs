#![allow(renamed_and_removed_lints)]
#![allow(non_snake_case)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

#[macro_use]
extern crate log;

extern crate rand;
extern crate regex;

// graphing
extern crate petgraph;

// parallel apply
extern crate threadpool;

#[macro_use]
extern crate failure;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Process-wide options, threaded explicitly instead of read from globals.
pub mod config;
pub use config::Global;

/// Sentinel strings minted during template expansion, resolved later.
pub mod markers;
pub use markers::{Marker, MarkerStore};

/// Infrastructures, Modules, Dependencies and the Project they live in.
pub mod project;
pub use project::{Dependency, Infrastructure, Project};

/// The `Module` capability trait and the fields shared by every module kind.
pub mod module;
pub use module::{Module, ModuleState, SharedModule};

/// Name -> factory tables for module kinds and backend kinds.
pub mod registry;
pub use registry::{BackendFactory, ModuleFactory, Registry};

/// The `Backend` capability trait.
pub mod backend;
pub use backend::Backend;

/// Walks nested value trees, substituting markers and registering edges.
pub mod resolver;

/// DAG construction and bounded-parallelism ready-queue dispatch.
pub mod grapher;
pub use grapher::Grapher;

/// Persisted state document, diffing and per-module reconciliation.
pub mod state;
pub use state::StateProject;

/// Top-level plan / apply / destroy entrypoints.
pub mod orchestrator;

/// Concrete, in-memory module kinds used by tests and as references for
/// real module kinds wired up by the CLI binary.
pub mod modules;

/// Concrete backend kinds.
pub mod backends;

/// Diff helper trait consumed by the state engine; the CLI supplies a richer
/// colorized implementation, the core ships a plain structural one.
pub mod diff;
pub use diff::StructuredDiff;
