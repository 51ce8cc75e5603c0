use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ImportSummary, ProjectSettings, Tree, TreeNode, TreePrompt};

/// Builds the full tree: prompts by ascending id, each with its nodes by
/// ascending id. The settings read degrades to the built-in defaults so tree
/// viewing stays available when that row cannot be read.
pub fn assemble_tree(db: &Database) -> AppResult<Tree> {
    let prompts = db
        .list_prompts()?
        .into_iter()
        .map(|prompt| {
            let nodes = db
                .list_nodes(prompt.id)?
                .into_iter()
                .map(|node| TreeNode {
                    id: node.id,
                    name: node.name,
                    action: node.action,
                })
                .collect();
            Ok(TreePrompt {
                id: prompt.id,
                title: prompt.title,
                description: prompt.description,
                nodes,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let settings = match db.get_project_settings() {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!(error = %error, "failed to read project settings; using defaults");
            ProjectSettings::default()
        }
    };

    Ok(Tree {
        project: settings.project_name,
        main_request: settings.main_request,
        prompts,
    })
}

/// Checks an incoming tree without touching storage.
pub fn validate_tree(tree: &Tree) -> AppResult<()> {
    if tree.project.trim().is_empty() {
        return Err(AppError::validation("project name is required"));
    }
    if tree.prompts.is_empty() {
        return Err(AppError::validation("at least one prompt is required"));
    }
    for prompt in &tree.prompts {
        if prompt.title.trim().is_empty() {
            return Err(AppError::validation("all prompts must have a title"));
        }
        if prompt.nodes.iter().any(|node| node.name.trim().is_empty()) {
            return Err(AppError::validation("all nodes must have a name"));
        }
    }
    Ok(())
}

/// Validates, then replaces the live tree wholesale. Notes attached to the
/// replaced prompts are removed by cascade.
pub fn import_tree(db: &Database, tree: &Tree) -> AppResult<ImportSummary> {
    validate_tree(tree)?;

    let summary = db.replace_tree(tree)?;
    if summary.notes_discarded > 0 {
        tracing::warn!(
            notes = summary.notes_discarded,
            "tree import discarded notes attached to replaced prompts"
        );
    }
    tracing::info!(
        project = %tree.project,
        prompts = summary.prompts,
        nodes = summary.nodes,
        "tree imported"
    );
    Ok(summary)
}
