use std::collections::BTreeMap;

use tera::{Context, Tera};

use crate::Result;

/// Renders `raw` as a one-off tera template against a flat string context,
/// grounded in the teacher's own "A renderer of `tera` templates (jinja
/// style)" module: the whole project file is rendered once, as plain text,
/// before it is parsed as YAML. Remote-state references are left untouched
/// here — tera has no notion of another module's not-yet-known output, so
/// those are minted into markers separately once the document is parsed
/// (see `load::mint_inline_markers`).
pub fn expand(raw: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut ctx = Context::new();
    for (k, v) in vars {
        ctx.insert(k, v);
    }
    Tera::one_off(raw, &ctx, false).map_err(|e| failure::err_msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_a_flat_variable() {
        let mut vars = BTreeMap::new();
        vars.insert("region".to_string(), "us-east-1".to_string());
        let out = expand("bucket-{{ region }}", &vars).unwrap();
        assert_eq!(out, "bucket-us-east-1");
    }

    #[test]
    fn leaves_non_template_text_untouched() {
        let vars = BTreeMap::new();
        let out = expand("plain text, no braces", &vars).unwrap();
        assert_eq!(out, "plain text, no braces");
    }
}
