use std::sync::Arc;

use threadpool::ThreadPool;

use crate::config::Global;
use crate::diff::StructuredDiff;
use crate::grapher::{Grapher, NextOutcome};
use crate::project::Project;
use crate::registry::Registry;
use crate::state::StateProject;
use crate::Result;

#[derive(Debug, Fail)]
enum OrchestratorErrKind {
    #[fail(display = "module '{}' failed: {}", _0, _1)]
    ModuleFailed(String, String),
}

/// Computes what Apply would do without touching state or generated code:
/// a destruction entry for every module present in state but absent from
/// `desired`, and a change entry for every desired module whose
/// `CheckModuleChanges` comes back non-empty (spec.md §4.7, grounded in
/// `original_source/pkg/project/commands.go`'s `Plan`).
///
/// `ShowTerraformPlan` additionally invokes a changed module's `Plan()`
/// once all of its dependencies are already present in state.
pub fn plan(
    global: &Global,
    registry: &Registry,
    desired: &Project,
    diff_helper: &dyn StructuredDiff,
) -> Result<String> {
    let state = StateProject::load(global, registry, desired)?;
    let mut report = String::new();

    let destroy_grapher = state.build_grapher(1, true)?;
    for key in destroy_grapher.sequence_set() {
        if desired.modules.contains_key(&key) {
            continue;
        }
        let d = state.destruction_diff(&key, diff_helper);
        if !d.is_empty() {
            report.push_str(&format!("- {}\n{}\n", key, d));
        }
    }

    let desired_grapher = Grapher::init(desired, 1, false)?;
    for key in desired_grapher.sequence_set() {
        let d = state.check_module_changes(desired, &key, diff_helper);
        if d.is_empty() {
            continue;
        }
        report.push_str(&format!("~ {}\n{}\n", key, d));

        if global.show_terraform_plan {
            let module = &desired.modules[&key];
            let deps_deployed = module.dependencies().iter().all(|dep| state.has_module(&dep.target_key));
            if deps_deployed {
                if let Err(e) = module.build(desired.code_cache_dir()) {
                    error!("build failed for '{}', attempting plan anyway: {}", key, e);
                }
                if let Err(e) = module.plan() {
                    error!("module '{}' plan returned an error: {}", key, e);
                }
            }
        }
    }
    Ok(report)
}

/// Drives `desired` to completion: modules gone from `desired` are
/// destroyed sequentially and dependent-first first, persisting state after
/// each; the remaining modules are then built and applied with up to
/// `global.max_parallel` running at once, in dependency order, persisting
/// state after each success (spec.md §4.7, grounded in
/// `original_source/pkg/project/commands.go`'s `Apply`).
///
/// The first module failure halts new dispatch; in-flight work is drained
/// via `Grapher::wait` before the error is surfaced, matching the
/// fail-fast-but-don't-abandon-workers semantics of the original.
pub fn apply(
    global: &Global,
    registry: Arc<Registry>,
    desired: Arc<Project>,
    diff_helper: Arc<dyn StructuredDiff>,
) -> Result<()> {
    let state = Arc::new(StateProject::load(global, &registry, &desired)?);

    let destroy_grapher = state.build_grapher(1, true)?;
    for key in destroy_grapher.sequence_set() {
        if desired.modules.contains_key(&key) {
            continue;
        }
        info!("destroying vanished module '{}'", key);
        state.build_and_destroy(&key, &global.state_cache_dir)?;
        state.delete_module(&key);
        state.save_state()?;
    }

    let grapher = Arc::new(Grapher::init(&desired, global.max_parallel, false)?);
    let pool = ThreadPool::new(global.max_parallel.max(1));

    loop {
        match grapher.next_async() {
            NextOutcome::Done => break,
            NextOutcome::Failed(key, msg) => {
                grapher.wait();
                return Err(OrchestratorErrKind::ModuleFailed(key, msg).into());
            }
            NextOutcome::Work(key, handle) => {
                let desired = Arc::clone(&desired);
                let state = Arc::clone(&state);
                let registry = Arc::clone(&registry);
                let diff_helper = Arc::clone(&diff_helper);
                let global = global.clone();
                pool.execute(move || {
                    let result = apply_one(&global, &registry, &desired, &state, diff_helper.as_ref(), &key);
                    handle.finish(result);
                });
            }
        }
    }
    Ok(())
}

fn apply_one(
    global: &Global,
    registry: &Registry,
    desired: &Project,
    state: &StateProject,
    diff_helper: &dyn StructuredDiff,
    key: &str,
) -> Result<()> {
    let module = desired
        .modules
        .get(key)
        .expect("grapher only schedules keys present in the project it was built from");

    let changed = global.force || !state.check_module_changes(desired, key, diff_helper).is_empty();
    if !changed {
        info!("module '{}' is unchanged, skipping", key);
        return Ok(());
    }

    if let Err(e) = module.build(desired.code_cache_dir()) {
        error!("build failed for '{}', applying anyway: {}", key, e);
    }
    module.apply()?;

    let factory = registry.module_factory(module.kind())?;
    let persisted = factory.new_from_state(key, &module.get_state())?;
    state.update_module(persisted);
    state.save_state()?;
    Ok(())
}

/// Tears down every module in `desired` (with `global.force`) or every
/// module recorded in state, dependents-first, persisting state after each
/// successful destruction; removes the state file once nothing remains
/// (spec.md §4.7, grounded in `original_source/pkg/project/commands.go`'s
/// `Destroy`).
pub fn destroy(global: &Global, registry: &Registry, desired: &Project) -> Result<()> {
    let state = StateProject::load(global, registry, desired)?;

    let grapher = if global.force {
        Grapher::init(desired, 1, true)?
    } else {
        state.build_grapher(1, true)?
    };

    for key in grapher.sequence_set() {
        info!("destroying module '{}'", key);
        if global.force {
            if let Some(module) = desired.modules.get(&key) {
                if let Err(e) = module.build(&global.state_cache_dir) {
                    error!("build failed for '{}', destroying anyway: {}", key, e);
                }
                module.destroy()?;
            }
        } else {
            state.build_and_destroy(&key, &global.state_cache_dir)?;
        }
        state.delete_module(&key);
        state.save_state()?;
    }

    if global.state_file_name.is_file() {
        std::fs::remove_file(&global.state_file_name)?;
    }
    Ok(())
}
