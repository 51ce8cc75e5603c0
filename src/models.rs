use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PROJECT_NAME: &str = "Personal Finance Copilot";
pub const DEFAULT_MAIN_REQUEST: &str = "Build a web app that helps users track spending, set goals, and get AI-powered budgeting advice from categorized transactions.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Prompt {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub project_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Node {
    pub id: i64,
    pub prompt_id: i64,
    pub name: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Note {
    pub id: i64,
    pub prompt_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProjectSettings {
    pub project_name: String,
    pub main_request: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            main_request: DEFAULT_MAIN_REQUEST.to_string(),
        }
    }
}

/// Full assembled view of the project and its prompts.
///
/// Every collection deserializes to an empty vec when absent so an import body
/// missing `prompts` fails validation rather than JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub main_request: String,
    #[serde(default)]
    pub prompts: Vec<TreePrompt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TreePrompt {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TreeNode {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ImportSummary {
    pub prompts: usize,
    pub nodes: usize,
    pub notes_discarded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SavedTreeInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SavedTreeRecord {
    pub info: SavedTreeInfo,
    pub tree_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedTreeListResponse {
    pub trees: Vec<SavedTreeInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportTreeRequest {
    pub tree: Tree,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SaveTreeRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreatePromptRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateNodeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateNoteRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateNoteRequest {
    #[serde(default)]
    pub content: String,
}

/// A column that a partial update may assign. The table and column names are
/// static so update statements never interpolate caller input.
pub trait PatchColumn: Copy {
    const TABLE: &'static str;

    fn name(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptColumn {
    Title,
    Description,
}

impl PatchColumn for PromptColumn {
    const TABLE: &'static str = "prompts";

    fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeColumn {
    Name,
    Action,
}

impl PatchColumn for NodeColumn {
    const TABLE: &'static str = "nodes";

    fn name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Action => "action",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteColumn {
    Content,
}

impl PatchColumn for NoteColumn {
    const TABLE: &'static str = "notes";

    fn name(self) -> &'static str {
        match self {
            Self::Content => "content",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PromptPatch {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl PromptPatch {
    pub fn assignments(&self) -> Vec<(PromptColumn, &str)> {
        let mut out = Vec::new();
        if let Some(title) = &self.title {
            out.push((PromptColumn::Title, title.as_str()));
        }
        if let Some(description) = &self.description {
            out.push((PromptColumn::Description, description.as_str()));
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub action: Option<String>,
}

impl NodePatch {
    pub fn assignments(&self) -> Vec<(NodeColumn, &str)> {
        let mut out = Vec::new();
        if let Some(name) = &self.name {
            out.push((NodeColumn::Name, name.as_str()));
        }
        if let Some(action) = &self.action {
            out.push((NodeColumn::Action, action.as_str()));
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}
