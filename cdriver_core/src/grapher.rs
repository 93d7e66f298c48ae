use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex};

use petgraph::algo::toposort;
use petgraph::graph::{Graph, NodeIndex};

use crate::project::Project;
use crate::Result;

#[derive(Debug, Fail)]
enum GrapherErrKind {
    #[fail(display = "dependency cycle detected involving module '{}'", _0)]
    CycleDetected(String),
}

struct Inner {
    /// Nodes whose predecessors have all completed successfully but which
    /// have not yet been dispatched.
    ready: BTreeSet<String>,
    /// Count of not-yet-satisfied predecessors, per node.
    remaining_preds: BTreeMap<String, usize>,
    running: usize,
    completed: BTreeSet<String>,
    skipped: BTreeSet<String>,
    failed: Option<(String, String)>,
}

/// Builds a DAG from a `Project` and drives modules to completion in
/// dependency order with bounded parallelism (spec.md §4.5).
///
/// Cycle detection at `init` time uses `petgraph::algo::toposort` over a
/// `Graph<String, ()>` with one edge per dependency (target -> dependent).
/// The actual scheduling order is computed separately with a
/// lexicographically tie-broken Kahn's algorithm, since `toposort` makes no
/// ordering guarantee among nodes with no relative order.
pub struct Grapher {
    max_parallel: usize,
    reverse: bool,
    /// node -> its direct dependency targets (forward edges it depends on).
    preds_of: Arc<BTreeMap<String, BTreeSet<String>>>,
    /// node -> the nodes that depend on it (forward edges pointing at it).
    dependents_of: BTreeMap<String, BTreeSet<String>>,
    all_nodes: BTreeSet<String>,
    state: Arc<(Mutex<Inner>, Condvar)>,
}

/// A handle a worker must invoke exactly once with the result of processing
/// the node it was handed by `next_async`.
pub struct FinishHandle {
    key: String,
    state: Arc<(Mutex<Inner>, Condvar)>,
    effective_succs: Vec<String>,
    effective_preds_of: Arc<BTreeMap<String, BTreeSet<String>>>,
}

impl FinishHandle {
    /// `Ok(())` marks the node completed and releases its dependents.
    /// `Err` marks it failed; all transitive dependents are marked
    /// `Skipped` rather than dispatched.
    pub fn finish(self, result: Result<()>) {
        let (mux, cvar) = &*self.state;
        let mut inner = mux.lock().unwrap();
        inner.running -= 1;
        match result {
            Ok(()) => {
                inner.completed.insert(self.key.clone());
                for succ in &self.effective_succs {
                    if let Some(count) = inner.remaining_preds.get_mut(succ) {
                        *count -= 1;
                        if *count == 0 && !inner.completed.contains(succ) && !inner.skipped.contains(succ) {
                            inner.ready.insert(succ.clone());
                        }
                    }
                }
            }
            Err(e) => {
                if inner.failed.is_none() {
                    inner.failed = Some((self.key.clone(), e.to_string()));
                }
                inner.completed.insert(self.key.clone());
                mark_skipped_recursive(&mut inner, &self.key, &self.effective_preds_of);
            }
        }
        cvar.notify_all();
    }
}

fn mark_skipped_recursive(
    inner: &mut Inner,
    failed_key: &str,
    effective_preds_of: &BTreeMap<String, BTreeSet<String>>,
) {
    // effective_preds_of maps node -> its (direction-aware) predecessors;
    // we need the reverse: everything that lists failed_key as a predecessor.
    let mut to_visit: Vec<String> = effective_preds_of
        .iter()
        .filter(|(_, preds)| preds.contains(failed_key))
        .map(|(k, _)| k.clone())
        .collect();
    while let Some(node) = to_visit.pop() {
        if inner.skipped.contains(&node) || inner.completed.contains(&node) {
            continue;
        }
        inner.skipped.insert(node.clone());
        inner.ready.remove(&node);
        for (k, preds) in effective_preds_of {
            if preds.contains(&node) && !inner.skipped.contains(k) && !inner.completed.contains(k) {
                to_visit.push(k.clone());
            }
        }
    }
}

pub enum NextOutcome {
    /// A ready node to process, plus the handle to report its result with.
    Work(String, FinishHandle),
    /// All nodes completed or skipped; nothing left to dispatch.
    Done,
    /// A prior callback reported an error; scheduling has ceased. Carries
    /// the key of the module that failed and its error message.
    Failed(String, String),
}

impl Grapher {
    pub fn init(project: &Project, max_parallel: usize, reverse: bool) -> Result<Self> {
        let mut preds_of: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents_of: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let all_nodes: BTreeSet<String> = project.modules.keys().cloned().collect();

        for key in &all_nodes {
            preds_of.entry(key.clone()).or_default();
            dependents_of.entry(key.clone()).or_default();
        }
        for (key, module) in &project.modules {
            for dep in module.dependencies() {
                preds_of.entry(key.clone()).or_default().insert(dep.target_key.clone());
                dependents_of
                    .entry(dep.target_key.clone())
                    .or_default()
                    .insert(key.clone());
            }
        }

        // Cycle check via petgraph: one node per module, one edge per
        // dependency (target -> dependent), independent of `reverse`.
        let mut indices: BTreeMap<String, NodeIndex> = BTreeMap::new();
        let mut g = Graph::<String, ()>::new();
        for key in &all_nodes {
            indices.insert(key.clone(), g.add_node(key.clone()));
        }
        for (key, preds) in &preds_of {
            for target in preds {
                if let (Some(&t), Some(&k)) = (indices.get(target), indices.get(key)) {
                    g.add_edge(t, k, ());
                }
            }
        }
        if let Err(cyc) = toposort(&g, None) {
            let node = g[cyc.node_id()].clone();
            return Err(GrapherErrKind::CycleDetected(node).into());
        }

        let (effective_preds, effective_succs) = if reverse {
            (dependents_of.clone(), preds_of.clone())
        } else {
            (preds_of.clone(), dependents_of.clone())
        };

        let mut remaining_preds = BTreeMap::new();
        let mut ready = BTreeSet::new();
        for key in &all_nodes {
            let n = effective_preds.get(key).map(|s| s.len()).unwrap_or(0);
            remaining_preds.insert(key.clone(), n);
            if n == 0 {
                ready.insert(key.clone());
            }
        }

        Ok(Grapher {
            max_parallel: max_parallel.max(1),
            reverse,
            preds_of: Arc::new(effective_preds),
            dependents_of: effective_succs,
            all_nodes,
            state: Arc::new((
                Mutex::new(Inner {
                    ready,
                    remaining_preds,
                    running: 0,
                    completed: BTreeSet::new(),
                    skipped: BTreeSet::new(),
                    failed: None,
                }),
                Condvar::new(),
            )),
        })
    }

    /// A deterministic topological linearisation, reversed when `reverse`
    /// was set at `init` time (used by destroy: dependents first).
    pub fn sequence_set(&self) -> Vec<String> {
        let mut remaining_preds: BTreeMap<String, usize> = BTreeMap::new();
        for key in &self.all_nodes {
            remaining_preds.insert(key.clone(), self.preds_of.get(key).map(|s| s.len()).unwrap_or(0));
        }
        let mut ready: BTreeSet<String> = remaining_preds
            .iter()
            .filter(|(_, &n)| n == 0)
            .map(|(k, _)| k.clone())
            .collect();
        let mut order = Vec::with_capacity(self.all_nodes.len());
        while let Some(key) = ready.iter().next().cloned() {
            ready.remove(&key);
            order.push(key.clone());
            if let Some(succs) = self.dependents_of.get(&key) {
                for s in succs {
                    if let Some(c) = remaining_preds.get_mut(s) {
                        *c -= 1;
                        if *c == 0 {
                            ready.insert(s.clone());
                        }
                    }
                }
            }
        }
        order
    }

    /// Number of nodes not yet completed (successfully finished or
    /// skipped).
    pub fn len(&self) -> usize {
        let (mux, _) = &*self.state;
        let inner = mux.lock().unwrap();
        self.all_nodes.len() - inner.completed.len() - inner.skipped.len()
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Blocks until either a ready node is available and below the
    /// parallelism cap, everything is done, or a prior callback failed.
    pub fn next_async(&self) -> NextOutcome {
        let (mux, cvar) = &*self.state;
        let mut inner = mux.lock().unwrap();
        loop {
            if let Some((key, msg)) = inner.failed.clone() {
                return NextOutcome::Failed(key, msg);
            }
            if inner.completed.len() + inner.skipped.len() == self.all_nodes.len() {
                return NextOutcome::Done;
            }
            if inner.running < self.max_parallel {
                if let Some(key) = inner.ready.iter().next().cloned() {
                    inner.ready.remove(&key);
                    inner.running += 1;
                    let handle = FinishHandle {
                        key: key.clone(),
                        state: self.state.clone(),
                        effective_succs: self
                            .dependents_of
                            .get(&key)
                            .map(|s| s.iter().cloned().collect())
                            .unwrap_or_default(),
                        effective_preds_of: self.preds_of.clone(),
                    };
                    return NextOutcome::Work(key, handle);
                }
            }
            inner = cvar.wait(inner).unwrap();
        }
    }

    /// Blocks until every in-flight worker has invoked its callback.
    pub fn wait(&self) {
        let (mux, cvar) = &*self.state;
        let mut inner = mux.lock().unwrap();
        while inner.running > 0 {
            inner = cvar.wait(inner).unwrap();
        }
    }
}
