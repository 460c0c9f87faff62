//! Oncology-condition dictionary: disease classification code → trial ids.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

pub trait ConditionDictionary: Send + Sync {
    fn trial_ids_for_condition_codes(&self, codes: &[String]) -> HashSet<String>;
}

/// OncoTree code (stored upper-case) → trial ids known to be relevant.
#[derive(Debug, Clone, Default)]
pub struct OncoTreeTrialIndex {
    by_code: HashMap<String, HashSet<String>>,
}

fn trial_id_from(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => ["nctId", "nct_id", "nctID", "id"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))?,
        _ => return None,
    };
    let raw = raw.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

fn trial_ids_from(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(trial_id_from).collect(),
        Value::Object(obj) => obj
            .get("trials")
            .or_else(|| obj.get("nctIds"))
            .map(trial_ids_from)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

impl OncoTreeTrialIndex {
    pub fn insert(&mut self, code: &str, trial_id: &str) {
        let code = code.trim();
        let trial_id = trial_id.trim();
        if code.is_empty() || trial_id.is_empty() {
            return;
        }
        self.by_code
            .entry(code.to_ascii_uppercase())
            .or_default()
            .insert(trial_id.to_string());
    }

    /// Builds the index from `{ "<code>": <trials> }`, where `<trials>` is an
    /// array of ids or trial objects, or an object holding a `trials` array.
    /// Entries of any other shape are skipped.
    pub fn from_json(value: &Value) -> Self {
        let mut index = Self::default();
        let Some(obj) = value.as_object() else {
            return index;
        };
        for (code, trials) in obj {
            for id in trial_ids_from(trials) {
                index.insert(code, &id);
            }
        }
        index
    }

    pub fn code_count(&self) -> usize {
        self.by_code.len()
    }
}

impl ConditionDictionary for OncoTreeTrialIndex {
    fn trial_ids_for_condition_codes(&self, codes: &[String]) -> HashSet<String> {
        codes
            .iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .filter_map(|c| self.by_code.get(&c))
            .flat_map(|ids| ids.iter().cloned())
            .collect()
    }
}
