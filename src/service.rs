use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    CreateNodeRequest, CreateNoteRequest, CreatePromptRequest, ImportSummary, Node, NodePatch, Note, Prompt,
    PromptPatch, SavedTreeInfo, Tree, UpdateNoteRequest,
};
use crate::notifier::Notifier;
use crate::registry::SavedTreeRegistry;
use crate::tree::{assemble_tree, import_tree};
use std::sync::Arc;

/// Entry point for all tree and entity operations. Checks existence before
/// mutating and announces successful mutations on the notifier.
#[derive(Debug, Clone)]
pub struct PromptService {
    db: Arc<Database>,
    registry: SavedTreeRegistry,
    notifier: Notifier,
}

impl PromptService {
    pub fn new(db: Arc<Database>, notifier: Notifier) -> Self {
        Self {
            registry: SavedTreeRegistry::new(db.clone()),
            db,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn get_tree(&self) -> AppResult<Tree> {
        assemble_tree(&self.db)
    }

    pub fn import_tree(&self, tree: &Tree) -> AppResult<ImportSummary> {
        let summary = import_tree(&self.db, tree)?;
        self.notifier.broadcast_tree_changed();
        Ok(summary)
    }

    pub fn save_tree(&self, name: &str) -> AppResult<SavedTreeInfo> {
        self.registry.save(name)
    }

    pub fn load_tree(&self, name: &str) -> AppResult<ImportSummary> {
        let summary = self.registry.load(name)?;
        self.notifier.broadcast_tree_changed();
        Ok(summary)
    }

    pub fn list_saved_trees(&self) -> AppResult<Vec<SavedTreeInfo>> {
        self.registry.list()
    }

    pub fn delete_saved_tree(&self, name: &str) -> AppResult<()> {
        self.registry.delete(name)
    }

    pub fn get_prompt(&self, id: i64) -> AppResult<Prompt> {
        self.db.get_prompt(id)?.ok_or_else(prompt_not_found)
    }

    pub fn create_prompt(&self, request: &CreatePromptRequest) -> AppResult<Prompt> {
        require_text(&request.title, "title is required")?;
        let prompt = self.db.insert_prompt(&request.title, &request.description)?;
        tracing::info!(prompt_id = prompt.id, "prompt created");
        self.notifier.broadcast_tree_changed();
        Ok(prompt)
    }

    pub fn update_prompt(&self, id: i64, patch: &PromptPatch) -> AppResult<Prompt> {
        if let Some(title) = &patch.title {
            require_text(title, "title must not be empty")?;
        }
        self.ensure_prompt(id)?;
        let prompt = self
            .db
            .update_prompt(id, &patch.assignments())?
            .ok_or_else(prompt_not_found)?;
        self.notifier.broadcast_prompt_changed(id);
        Ok(prompt)
    }

    pub fn delete_prompt(&self, id: i64) -> AppResult<()> {
        self.ensure_prompt(id)?;
        if !self.db.delete_prompt(id)? {
            return Err(prompt_not_found());
        }
        tracing::info!(prompt_id = id, "prompt deleted");
        self.notifier.broadcast_tree_changed();
        Ok(())
    }

    pub fn get_prompt_nodes(&self, prompt_id: i64) -> AppResult<Vec<Node>> {
        self.ensure_prompt(prompt_id)?;
        self.db.list_nodes(prompt_id)
    }

    pub fn create_node(&self, prompt_id: i64, request: &CreateNodeRequest) -> AppResult<Node> {
        require_text(&request.name, "name is required")?;
        self.ensure_prompt(prompt_id)?;
        let node = self.db.insert_node(prompt_id, &request.name, &request.action)?;
        self.notifier.broadcast_node_changed(prompt_id);
        Ok(node)
    }

    pub fn update_node(&self, prompt_id: i64, node_id: i64, patch: &NodePatch) -> AppResult<Node> {
        if let Some(name) = &patch.name {
            require_text(name, "name must not be empty")?;
        }
        self.ensure_node(prompt_id, node_id)?;
        let node = self
            .db
            .update_node(node_id, &patch.assignments())?
            .ok_or_else(node_not_found)?;
        self.notifier.broadcast_node_changed(prompt_id);
        Ok(node)
    }

    pub fn delete_node(&self, prompt_id: i64, node_id: i64) -> AppResult<()> {
        self.ensure_node(prompt_id, node_id)?;
        if !self.db.delete_node(node_id)? {
            return Err(node_not_found());
        }
        self.notifier.broadcast_node_changed(prompt_id);
        Ok(())
    }

    pub fn get_notes(&self, prompt_id: i64) -> AppResult<Vec<Note>> {
        self.ensure_prompt(prompt_id)?;
        self.db.list_notes(prompt_id)
    }

    pub fn create_note(&self, prompt_id: i64, request: &CreateNoteRequest) -> AppResult<Note> {
        require_text(&request.content, "content is required")?;
        self.ensure_prompt(prompt_id)?;
        let note = self.db.insert_note(prompt_id, &request.content)?;
        self.notifier.broadcast_note_changed(prompt_id);
        Ok(note)
    }

    pub fn update_note(&self, prompt_id: i64, note_id: i64, request: &UpdateNoteRequest) -> AppResult<Note> {
        require_text(&request.content, "content is required")?;
        self.ensure_note(prompt_id, note_id)?;
        let note = self
            .db
            .update_note(note_id, &request.content)?
            .ok_or_else(note_not_found)?;
        self.notifier.broadcast_note_changed(prompt_id);
        Ok(note)
    }

    pub fn delete_note(&self, prompt_id: i64, note_id: i64) -> AppResult<()> {
        self.ensure_note(prompt_id, note_id)?;
        if !self.db.delete_note(note_id)? {
            return Err(note_not_found());
        }
        self.notifier.broadcast_note_changed(prompt_id);
        Ok(())
    }

    fn ensure_prompt(&self, id: i64) -> AppResult<()> {
        if self.db.prompt_exists(id)? {
            Ok(())
        } else {
            Err(prompt_not_found())
        }
    }

    /// A node addressed under the wrong prompt is treated as missing.
    fn ensure_node(&self, prompt_id: i64, node_id: i64) -> AppResult<()> {
        match self.db.get_node(node_id)? {
            Some(node) if node.prompt_id == prompt_id => Ok(()),
            _ => Err(node_not_found()),
        }
    }

    fn ensure_note(&self, prompt_id: i64, note_id: i64) -> AppResult<()> {
        match self.db.get_note(note_id)? {
            Some(note) if note.prompt_id == prompt_id => Ok(()),
            _ => Err(note_not_found()),
        }
    }
}

fn require_text(value: &str, message: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(message));
    }
    Ok(())
}

fn prompt_not_found() -> AppError {
    AppError::not_found("prompt not found")
}

fn node_not_found() -> AppError {
    AppError::not_found("node not found")
}

fn note_not_found() -> AppError {
    AppError::not_found("note not found")
}

#[cfg(test)]
mod tests {
    use super::PromptService;
    use crate::db::Database;
    use crate::errors::AppError;
    use crate::models::{
        CreateNodeRequest, CreateNoteRequest, CreatePromptRequest, NodePatch, PromptPatch, Tree, UpdateNoteRequest,
    };
    use crate::notifier::{ChangeKind, Notifier};
    use std::sync::Arc;

    fn service(dir: &tempfile::TempDir) -> PromptService {
        let db = Arc::new(Database::new(&dir.path().join("service.db")).expect("db"));
        PromptService::new(db, Notifier::default())
    }

    fn prompt(service: &PromptService, title: &str) -> i64 {
        service
            .create_prompt(&CreatePromptRequest {
                title: title.to_string(),
                description: String::new(),
            })
            .expect("create prompt")
            .id
    }

    #[test]
    fn deleted_prompt_children_report_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(&dir);
        let id = prompt(&service, "Doomed");
        service
            .create_node(id, &CreateNodeRequest { name: "n".to_string(), action: String::new() })
            .expect("node");
        service
            .create_note(id, &CreateNoteRequest { content: "c".to_string() })
            .expect("note");

        service.delete_prompt(id).expect("delete");
        assert!(matches!(service.get_prompt_nodes(id), Err(AppError::NotFound(_))));
        assert!(matches!(service.get_notes(id), Err(AppError::NotFound(_))));
        assert!(matches!(service.delete_prompt(id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn existing_prompt_without_children_lists_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(&dir);
        let id = prompt(&service, "Empty");
        assert!(service.get_prompt_nodes(id).expect("nodes").is_empty());
        assert!(service.get_notes(id).expect("notes").is_empty());
    }

    #[test]
    fn validation_happens_before_existence_checks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(&dir);
        assert!(matches!(
            service.create_node(404, &CreateNodeRequest::default()),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.create_prompt(&CreatePromptRequest::default()),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.update_prompt(
                404,
                &PromptPatch {
                    title: Some(String::new()),
                    description: None
                }
            ),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn node_must_belong_to_addressed_prompt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(&dir);
        let owner = prompt(&service, "Owner");
        let other = prompt(&service, "Other");
        let node = service
            .create_node(owner, &CreateNodeRequest { name: "n".to_string(), action: "a".to_string() })
            .expect("node");

        let patch = NodePatch {
            name: Some("renamed".to_string()),
            action: None,
        };
        assert!(matches!(service.update_node(other, node.id, &patch), Err(AppError::NotFound(_))));
        assert!(matches!(service.delete_node(other, node.id), Err(AppError::NotFound(_))));

        let updated = service.update_node(owner, node.id, &patch).expect("update");
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.action, "a");
    }

    #[test]
    fn note_must_belong_to_addressed_prompt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(&dir);
        let owner = prompt(&service, "Owner");
        let other = prompt(&service, "Other");
        let note = service
            .create_note(owner, &CreateNoteRequest { content: "draft".to_string() })
            .expect("note");
        let mut subscription = service.notifier().register("observer");

        let edit = UpdateNoteRequest {
            content: "final".to_string(),
        };
        let err = service.update_note(other, note.id, &edit).expect_err("wrong prompt");
        assert!(matches!(err, AppError::NotFound(ref message) if message == "note not found"));
        assert!(matches!(service.delete_note(other, note.id), Err(AppError::NotFound(_))));
        assert!(matches!(service.update_note(owner, 9_999, &edit), Err(AppError::NotFound(_))));
        assert!(subscription.try_recv().is_none());

        let updated = service.update_note(owner, note.id, &edit).expect("update");
        assert_eq!(updated.content, "final");
        assert_eq!(updated.created_at, note.created_at);
        let event = subscription.try_recv().expect("update event");
        assert_eq!(event.kind, ChangeKind::NoteChanged);
        assert_eq!(event.prompt_id, Some(owner));

        service.delete_note(owner, note.id).expect("delete");
        assert_eq!(subscription.try_recv().expect("delete event").kind, ChangeKind::NoteChanged);
        assert!(service.get_notes(owner).expect("notes").is_empty());
        assert!(matches!(service.delete_note(owner, note.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn blank_note_content_is_rejected_on_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(&dir);
        let id = prompt(&service, "Notes");
        let note = service
            .create_note(id, &CreateNoteRequest { content: "keep".to_string() })
            .expect("note");

        let blank = UpdateNoteRequest {
            content: "   ".to_string(),
        };
        assert!(matches!(service.update_note(id, note.id, &blank), Err(AppError::Validation(_))));
        assert_eq!(service.get_notes(id).expect("notes")[0].content, "keep");
    }

    #[test]
    fn owning_prompt_can_delete_node() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(&dir);
        let id = prompt(&service, "Owner");
        let node = service
            .create_node(id, &CreateNodeRequest { name: "n".to_string(), action: String::new() })
            .expect("node");
        let mut subscription = service.notifier().register("observer");

        service.delete_node(id, node.id).expect("delete");
        let event = subscription.try_recv().expect("delete event");
        assert_eq!(event.kind, ChangeKind::NodeChanged);
        assert_eq!(event.prompt_id, Some(id));
        assert!(service.get_prompt_nodes(id).expect("nodes").is_empty());
        assert!(matches!(service.delete_node(id, node.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn mutations_are_broadcast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(&dir);
        let mut subscription = service.notifier().register("observer");

        let id = prompt(&service, "Watched");
        assert_eq!(subscription.try_recv().expect("create").kind, ChangeKind::TreeChanged);

        service
            .update_prompt(
                id,
                &PromptPatch {
                    title: None,
                    description: Some("d".to_string()),
                },
            )
            .expect("update");
        let event = subscription.try_recv().expect("update event");
        assert_eq!(event.kind, ChangeKind::PromptChanged);
        assert_eq!(event.prompt_id, Some(id));

        service
            .create_note(id, &CreateNoteRequest { content: "hi".to_string() })
            .expect("note");
        assert_eq!(subscription.try_recv().expect("note").kind, ChangeKind::NoteChanged);

        let failed = service.import_tree(&Tree::default());
        assert!(failed.is_err());
        assert!(subscription.try_recv().is_none());
    }
}
