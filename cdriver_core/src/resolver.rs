use std::collections::BTreeSet;

use serde_yaml::Value;

use crate::markers::{looks_like_marker, MarkerStore};
use crate::module::SharedModule;
use crate::project::Dependency;
use crate::Result;

#[derive(Debug, Fail)]
enum ResolveErrKind {
    #[fail(display = "dependency target '{}' does not exist", _0)]
    DependencyTargetMissing(String),
    #[fail(display = "unresolved marker residue found after resolution: '{}'", _0)]
    UnresolvedMarker(String),
}

/// Read-only context the resolver needs: both marker stores, and the set of
/// module keys known to the project (for early `DependencyTargetMissing`
/// detection, mirroring `original_source/pkg/project/module.go`'s
/// `checkDependMarker`).
pub struct ResolveContext<'a> {
    pub splice_markers: &'a MarkerStore,
    pub remote_markers: &'a MarkerStore,
    pub known_module_keys: &'a BTreeSet<String>,
}

/// Walks `module`'s `Inputs`, rewriting sentinels in place and appending
/// `Dependency` edges for every remote-state reference encountered.
///
/// YAML-splice resolution runs before remote-state resolution because a
/// splice may itself introduce fresh remote-state sentinels (spec.md §4.4).
pub fn resolve_module_inputs(module: &mut SharedModule, ctx: &ResolveContext) -> Result<()> {
    let infra_name = module.infra_name.clone();
    let resolved = resolve_splices(&module.inputs, ctx.splice_markers);
    let (resolved, deps) = resolve_remote_refs(&resolved, ctx.remote_markers, &infra_name)?;

    for dep in &deps {
        if !ctx.known_module_keys.contains(&dep.target_key) {
            return Err(ResolveErrKind::DependencyTargetMissing(dep.target_key.clone()).into());
        }
        if !module.dependencies.contains(dep) {
            module.dependencies.push(dep.clone());
        }
    }

    check_no_residue(&resolved)?;
    module.inputs = resolved;
    Ok(())
}

fn resolve_splices(value: &Value, store: &MarkerStore) -> Value {
    match value {
        Value::String(s) => {
            if let Some(payload) = store.lookup_splice(s) {
                // A scalar equal to a splice sentinel is replaced wholesale,
                // and the payload may itself contain further sentinels.
                resolve_splices(payload, store)
            } else {
                value.clone()
            }
        }
        Value::Sequence(seq) => {
            Value::Sequence(seq.iter().map(|v| resolve_splices(v, store)).collect())
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(resolve_splices(k, store), resolve_splices(v, store));
            }
            Value::Mapping(out)
        }
        other => other.clone(),
    }
}

fn resolve_remote_refs(
    value: &Value,
    store: &MarkerStore,
    owning_infra: &str,
) -> Result<(Value, Vec<Dependency>)> {
    let mut deps = Vec::new();
    let out = resolve_remote_refs_inner(value, store, owning_infra, &mut deps)?;
    Ok((out, deps))
}

fn resolve_remote_refs_inner(
    value: &Value,
    store: &MarkerStore,
    owning_infra: &str,
    deps: &mut Vec<Dependency>,
) -> Result<Value> {
    match value {
        Value::String(s) => {
            let mut result = s.clone();
            for sentinel in store.remote_sentinels().cloned().collect::<Vec<_>>() {
                if result.contains(&sentinel) {
                    let (infra, module, output) = store.lookup_remote(&sentinel).unwrap();
                    let infra = if infra == "this" { owning_infra } else { infra };
                    let reference = format!(
                        "${{data.terraform_remote_state.{}-{}.outputs.{}}}",
                        infra, module, output
                    );
                    result = result.replace(&sentinel, &reference);
                    deps.push(Dependency {
                        target_key: format!("{}.{}", infra, module),
                        output: output.to_string(),
                    });
                }
            }
            Ok(Value::String(result))
        }
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for v in seq {
                out.push(resolve_remote_refs_inner(v, store, owning_infra, deps)?);
            }
            Ok(Value::Sequence(out))
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                let rk = resolve_remote_refs_inner(k, store, owning_infra, deps)?;
                let rv = resolve_remote_refs_inner(v, store, owning_infra, deps)?;
                out.insert(rk, rv);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

fn check_no_residue(value: &Value) -> Result<()> {
    match value {
        Value::String(s) if looks_like_marker(s) => {
            Err(ResolveErrKind::UnresolvedMarker(s.clone()).into())
        }
        Value::Sequence(seq) => {
            for v in seq {
                check_no_residue(v)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (k, v) in map {
                check_no_residue(k)?;
                check_no_residue(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
