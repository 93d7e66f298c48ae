use colored::Colorize;
use similar::{ChangeTag, TextDiff};

use cdriver_core::StructuredDiff;

/// Line-based diff over the pretty-printed JSON representation of two
/// optional trees, colorized with ANSI codes when asked. Grounded in the
/// teacher's own terminal-output conventions (`helm::direct` shells out and
/// prints colored status lines); here the diffing itself comes from
/// `similar`, matching the diff/patch crate already used by the rest of the
/// pack for readable terminal diffs.
pub struct ColorDiff;

impl StructuredDiff for ColorDiff {
    fn diff(&self, old: Option<&serde_json::Value>, new: Option<&serde_json::Value>, colorize: bool) -> String {
        let old_text = render(old);
        let new_text = render(new);
        if old_text == new_text {
            return String::new();
        }

        let diff = TextDiff::from_lines(&old_text, &new_text);
        let mut out = String::new();
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            let line = format!("{}{}", sign, change);
            if !colorize {
                out.push_str(&line);
                continue;
            }
            let colored = match change.tag() {
                ChangeTag::Delete => line.red().to_string(),
                ChangeTag::Insert => line.green().to_string(),
                ChangeTag::Equal => line.normal().to_string(),
            };
            out.push_str(&colored);
        }
        out
    }
}

fn render(value: Option<&serde_json::Value>) -> String {
    match value {
        None => String::new(),
        Some(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_trees_diff_to_empty_string() {
        let v = json!({"a": 1});
        assert_eq!(ColorDiff.diff(Some(&v), Some(&v), false), "");
    }

    #[test]
    fn changed_value_reports_both_sides() {
        let old = json!({"a": 1});
        let new = json!({"a": 2});
        let d = ColorDiff.diff(Some(&old), Some(&new), false);
        assert!(d.contains('1'));
        assert!(d.contains('2'));
    }

    #[test]
    fn colorize_wraps_output_in_ansi_codes() {
        let old = json!({"a": 1});
        let new = json!({"a": 2});
        let d = ColorDiff.diff(Some(&old), Some(&new), true);
        assert!(d.contains("\u{1b}["));
    }
}
