//! Action resolver and rule table (behavior → suggested action).
//!
//! The table lives in an editable JSON object:
//! `{ "Confirmation": "Close Ticket", "Objection": "Request Clarification", ... }`
//!
//! Stores never cache: every `load()` reads the backing storage again, so an
//! edit is visible to the very next resolution.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};
use tracing::{info, warn};

use crate::behavior::BehaviorLabel;
use crate::error::{OrchestratorError, Result};
use crate::store;

/// Suggested action for any behavior without a rule.
pub const FALLBACK_ACTION: &str = "Review Manually";
/// Extra override choice offered to reviewers.
pub const NO_ACTION: &str = "No Action";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable {
    rules: BTreeMap<String, String>,
}

impl RuleTable {
    pub fn default_table() -> Self {
        Self::from_pairs([
            (BehaviorLabel::Confirmation, "Close Ticket"),
            (BehaviorLabel::Objection, "Request Clarification"),
            (BehaviorLabel::Escalation, "Forward to Manager"),
            (BehaviorLabel::NewInformation, "Update Records"),
        ])
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (BehaviorLabel, &'a str)>) -> Self {
        Self {
            rules: pairs
                .into_iter()
                .map(|(l, a)| (l.as_str().to_string(), a.to_string()))
                .collect(),
        }
    }

    /// Exact canonical key first; otherwise any key that parses to the same label
    /// ("new_information", "ESCALATION", ...).
    pub fn get(&self, label: BehaviorLabel) -> Option<&str> {
        self.rules
            .get(label.as_str())
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|(k, _)| BehaviorLabel::parse_name(k) == Some(label))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Set the action for a behavior key. Unknown behavior names and blank actions are rejected.
    pub fn update(&mut self, behavior: &str, action: &str) -> Result<()> {
        let label = BehaviorLabel::parse_name(behavior).ok_or_else(|| {
            OrchestratorError::RuleStore(format!("unknown behavior '{behavior}'"))
        })?;
        let action = action.trim();
        if action.is_empty() {
            return Err(OrchestratorError::RuleStore(format!(
                "empty action for '{}'",
                label.as_str()
            )));
        }
        // Drop alias spellings so the canonical key is the only one left.
        self.rules
            .retain(|k, _| BehaviorLabel::parse_name(k) != Some(label));
        self.rules
            .insert(label.as_str().to_string(), action.to_string());
        Ok(())
    }

    /// Distinct configured actions (sorted) followed by "No Action".
    pub fn override_options(&self) -> Vec<String> {
        let mut set: BTreeSet<&str> = self.rules.values().map(String::as_str).collect();
        set.remove(NO_ACTION);
        let mut out: Vec<String> = set.into_iter().map(str::to_string).collect();
        out.push(NO_ACTION.to_string());
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// `rules[label]` when present, else "Review Manually".
pub fn resolve(label: BehaviorLabel, rules: &RuleTable) -> String {
    rules
        .get(label)
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_ACTION.to_string())
}

pub trait RuleStore: Send + Sync {
    /// Current table, read fresh.
    fn load(&self) -> Result<RuleTable>;
    /// Persist; the edit is in effect only once this returns Ok.
    fn save(&self, table: &RuleTable) -> Result<()>;
}

impl<T: RuleStore + ?Sized> RuleStore for Arc<T> {
    fn load(&self) -> Result<RuleTable> {
        (**self).load()
    }
    fn save(&self, table: &RuleTable) -> Result<()> {
        (**self).save(table)
    }
}

/// Rule table in a JSON file. Created with the default table on first load.
#[derive(Debug, Clone)]
pub struct JsonFileRuleStore {
    path: PathBuf,
}

impl JsonFileRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RuleStore for JsonFileRuleStore {
    fn load(&self) -> Result<RuleTable> {
        match store::read_json::<RuleTable>(&self.path) {
            Ok(Some(table)) => Ok(table),
            Ok(None) => {
                let table = RuleTable::default_table();
                self.save(&table)?;
                info!(path = %self.path.display(), "rule table created with defaults");
                Ok(table)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "rule table unreadable");
                Err(OrchestratorError::RuleStore(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        }
    }

    fn save(&self, table: &RuleTable) -> Result<()> {
        store::write_json_atomic(&self.path, table).map_err(|e| {
            OrchestratorError::RuleStore(format!("{}: {e}", self.path.display()))
        })?;
        metrics::counter!("rule_table_saves_total").increment(1);
        Ok(())
    }
}

/// In-process store, seeded with the default table.
#[derive(Debug)]
pub struct MemoryRuleStore {
    inner: RwLock<RuleTable>,
}

impl MemoryRuleStore {
    pub fn new(table: RuleTable) -> Self {
        Self {
            inner: RwLock::new(table),
        }
    }
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new(RuleTable::default_table())
    }
}

impl RuleStore for MemoryRuleStore {
    fn load(&self) -> Result<RuleTable> {
        self.inner
            .read()
            .map(|g| g.clone())
            .map_err(|_| OrchestratorError::RuleStore("rule table lock poisoned".into()))
    }

    fn save(&self, table: &RuleTable) -> Result<()> {
        let mut g = self
            .inner
            .write()
            .map_err(|_| OrchestratorError::RuleStore("rule table lock poisoned".into()))?;
        *g = table.clone();
        Ok(())
    }
}
