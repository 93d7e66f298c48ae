use serde_json::Value;

/// Computes a human-readable diff between two optional JSON trees, empty
/// when structurally equal (spec.md §6, "Structured-diff helper").
///
/// The core ships a plain, uncolored implementation good enough for tests
/// and headless use; the CLI supplies a richer line-based diff (via
/// `similar`) with optional ANSI coloring for interactive terminals.
pub trait StructuredDiff: Send + Sync {
    fn diff(&self, old: Option<&Value>, new: Option<&Value>, colorize: bool) -> String;
}

/// Minimal structural diff: recursively walks both trees and reports
/// added/removed/changed leaf paths. No colorization is ever applied here
/// regardless of the `colorize` flag — that's left to richer collaborators.
pub struct PlainDiff;

impl StructuredDiff for PlainDiff {
    fn diff(&self, old: Option<&Value>, new: Option<&Value>, _colorize: bool) -> String {
        let mut lines = Vec::new();
        walk("", old, new, &mut lines);
        lines.join("\n")
    }
}

fn walk(path: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<String>) {
    match (old, new) {
        (None, None) => {}
        (None, Some(n)) => out.push(format!("+ {}: {}", path, n)),
        (Some(o), None) => out.push(format!("- {}: {}", path, o)),
        (Some(o), Some(n)) if o == n => {}
        (Some(Value::Object(om)), Some(Value::Object(nm))) => {
            let mut keys: std::collections::BTreeSet<&String> = om.keys().collect();
            keys.extend(nm.keys());
            for k in keys {
                let sub = if path.is_empty() { k.clone() } else { format!("{}.{}", path, k) };
                walk(&sub, om.get(k), nm.get(k), out);
            }
        }
        (Some(o), Some(n)) => out.push(format!("~ {}: {} -> {}", path, o, n)),
    }
}
