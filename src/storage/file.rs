/// JSON file backed rule store
use super::{RuleStore, WriteContext};
use crate::error::{Result, SigError};
use crate::rules::{Rule, RowId, RuleUpdate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// On-disk layout. Rules are kept as raw values so that one bad entry does
/// not make the whole file unreadable.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RuleDocument {
    #[serde(default)]
    rules: Vec<serde_json::Value>,
}

/// Stores all rules in a single JSON document. Writes go to a temporary
/// file that replaces the document on success.
#[derive(Debug)]
pub struct FileRuleStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRuleStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_document(&self) -> Result<RuleDocument> {
        if !self.path.exists() {
            return Ok(RuleDocument::default());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(RuleDocument::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            SigError::PersistenceError(format!("{}: {}", self.path.display(), e))
        })
    }

    fn write_document(&self, ctx: &WriteContext, document: &RuleDocument) -> Result<()> {
        ctx.check()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(document)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        if let Err(e) = ctx.check() {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &self.path)?;
        debug!("Wrote {} rules to {}", document.rules.len(), self.path.display());
        Ok(())
    }

    fn entry_id(entry: &serde_json::Value) -> Option<RowId> {
        entry.get("id")?.as_str()?.parse().ok()
    }
}

impl RuleStore for FileRuleStore {
    fn find_all(&self) -> Result<Vec<Rule>> {
        let document = self.read_document()?;
        let mut rules = Vec::with_capacity(document.rules.len());

        for (index, entry) in document.rules.into_iter().enumerate() {
            match serde_json::from_value::<Rule>(entry) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(
                    "Skipping unreadable rule entry {} in {}: {}",
                    index,
                    self.path.display(),
                    e
                ),
            }
        }

        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    fn insert(&self, ctx: &WriteContext, rule: &Rule) -> Result<RowId> {
        let _guard = self.lock();
        let mut document = self.read_document()?;

        if document
            .rules
            .iter()
            .any(|entry| Self::entry_id(entry) == Some(rule.id))
        {
            return Err(SigError::PersistenceError(format!(
                "rule {} already stored",
                rule.id
            )));
        }

        document.rules.push(serde_json::to_value(rule)?);
        self.write_document(ctx, &document)?;
        Ok(rule.id)
    }

    fn update(&self, ctx: &WriteContext, id: RowId, update: &RuleUpdate) -> Result<bool> {
        let _guard = self.lock();
        let mut document = self.read_document()?;

        let Some(entry) = document
            .rules
            .iter_mut()
            .find(|entry| Self::entry_id(entry) == Some(id))
        else {
            return Ok(false);
        };

        let mut rule: Rule = serde_json::from_value(entry.clone())
            .map_err(|e| SigError::PersistenceError(format!("stored rule {}: {}", id, e)))?;
        update.apply(&mut rule);
        *entry = serde_json::to_value(&rule)?;

        self.write_document(ctx, &document)?;
        Ok(true)
    }
}
