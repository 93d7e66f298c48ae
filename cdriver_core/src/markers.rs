use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde_yaml::Value;

/// A sentinel string minted during template expansion and rewritten later
/// against the (by-then complete) module table.
///
/// Two kinds exist, matching the two marker stores a `Project` carries:
/// a YAML-splice marker substitutes a whole structured subtree in place; a
/// remote-state marker substitutes textually into a string and also
/// registers a `Dependency` edge on the owning module.
#[derive(Clone, Debug, PartialEq)]
pub enum Marker {
    /// Payload spliced in verbatim wherever the sentinel appears alone.
    YamlSplice(Value),
    /// Reference to another module's output, resolved by the marker
    /// resolver into the provisioning tool's remote-state reference string.
    RemoteState {
        infra_name: String,
        module_name: String,
        output: String,
    },
}

const YAML_PREFIX: &str = "##CDRIVER:yaml:";
const REMOTE_PREFIX: &str = "##CDRIVER:remote:";
const SUFFIX: &str = "##";

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes)
        .map(|_| format!("{:02x}", rng.gen::<u8>()))
        .collect()
}

/// Returns true if `s` contains something that looks like an unresolved
/// marker of either kind, used to enforce invariant I5 after resolution.
pub fn looks_like_marker(s: &str) -> bool {
    s.contains(YAML_PREFIX) || s.contains(REMOTE_PREFIX)
}

/// Per-project, per-kind sentinel -> payload table.
///
/// Populated only during sequential project load; read-only during the
/// parallel apply phase, matching the concurrency contract of spec §4.2.
#[derive(Clone, Debug, Default)]
pub struct MarkerStore {
    yaml: BTreeMap<String, Value>,
    remote: BTreeMap<String, (String, String, String)>,
}

impl MarkerStore {
    pub fn new() -> Self {
        MarkerStore::default()
    }

    /// Mints a fresh sentinel for a YAML-splice payload.
    pub fn register_splice(&mut self, payload: Value) -> String {
        loop {
            let sentinel = format!("{}{}{}", YAML_PREFIX, random_hex(12), SUFFIX);
            if !self.yaml.contains_key(&sentinel) {
                self.yaml.insert(sentinel.clone(), payload);
                return sentinel;
            }
        }
    }

    /// Mints a fresh sentinel referencing another module's output.
    pub fn register_remote(&mut self, infra_name: &str, module_name: &str, output: &str) -> String {
        loop {
            let sentinel = format!("{}{}{}", REMOTE_PREFIX, random_hex(12), SUFFIX);
            if !self.remote.contains_key(&sentinel) {
                self.remote.insert(
                    sentinel.clone(),
                    (infra_name.to_string(), module_name.to_string(), output.to_string()),
                );
                return sentinel;
            }
        }
    }

    pub fn lookup_splice(&self, sentinel: &str) -> Option<&Value> {
        self.yaml.get(sentinel)
    }

    pub fn lookup_remote(&self, sentinel: &str) -> Option<(&str, &str, &str)> {
        self.remote
            .get(sentinel)
            .map(|(i, m, o)| (i.as_str(), m.as_str(), o.as_str()))
    }

    pub fn splice_sentinels(&self) -> impl Iterator<Item = &String> {
        self.yaml.keys()
    }

    pub fn remote_sentinels(&self) -> impl Iterator<Item = &String> {
        self.remote.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.yaml.is_empty() && self.remote.is_empty()
    }

    pub fn merge(&mut self, other: &MarkerStore) {
        for (k, v) in &other.yaml {
            self.yaml.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.remote {
            self.remote.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

impl fmt::Display for MarkerStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "MarkerStore {{ {} splices, {} remote refs }}",
            self.yaml.len(),
            self.remote.len()
        )
    }
}
