use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ImportSummary, SavedTreeInfo, Tree};
use crate::tree::{assemble_tree, import_tree};
use std::sync::Arc;

/// Named snapshots of the live tree. Loading one replaces the live tree
/// through the importer, with the same validation and all-or-nothing semantics.
#[derive(Debug, Clone)]
pub struct SavedTreeRegistry {
    db: Arc<Database>,
}

impl SavedTreeRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn save(&self, name: &str) -> AppResult<SavedTreeInfo> {
        let name = require_name(name)?;
        let tree = assemble_tree(&self.db)?;
        let tree_data = serde_json::to_string(&tree)?;
        let info = self.db.upsert_saved_tree(name, &tree_data)?;
        tracing::info!(name = %info.name, prompts = tree.prompts.len(), "tree snapshot saved");
        Ok(info)
    }

    pub fn load(&self, name: &str) -> AppResult<ImportSummary> {
        let name = require_name(name)?;
        let record = self
            .db
            .get_saved_tree(name)?
            .ok_or_else(|| AppError::not_found("saved tree not found"))?;
        let tree: Tree = serde_json::from_str(&record.tree_data)
            .map_err(|error| AppError::Persist(format!("saved tree '{}' is unreadable: {}", name, error)))?;
        let summary = import_tree(&self.db, &tree)?;
        tracing::info!(
            name = %record.info.name,
            saved_at = %record.info.updated_at,
            "tree snapshot loaded"
        );
        Ok(summary)
    }

    pub fn list(&self) -> AppResult<Vec<SavedTreeInfo>> {
        self.db.list_saved_trees()
    }

    pub fn delete(&self, name: &str) -> AppResult<()> {
        let name = require_name(name)?;
        if !self.db.delete_saved_tree(name)? {
            return Err(AppError::not_found("saved tree not found"));
        }
        tracing::info!(name = %name, "tree snapshot deleted");
        Ok(())
    }
}

fn require_name(name: &str) -> AppResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("name is required"));
    }
    Ok(trimmed)
}
