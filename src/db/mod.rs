use crate::errors::{AppError, AppResult};
use crate::models::{
    ImportSummary, Node, NodeColumn, Note, NoteColumn, PatchColumn, ProjectSettings, Prompt, PromptColumn,
    SavedTreeInfo, SavedTreeRecord, Tree,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Persist("database mutex poisoned".to_string()))
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let defaults = ProjectSettings::default();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO project_settings (id, project_name, main_request) VALUES (1, ?1, ?2)",
            params![defaults.project_name, defaults.main_request],
        )?;
        Ok(())
    }

    pub fn get_project_settings(&self) -> AppResult<ProjectSettings> {
        let conn = self.conn()?;
        let settings = conn.query_row(
            "SELECT project_name, main_request FROM project_settings WHERE id = 1",
            [],
            |row| {
                Ok(ProjectSettings {
                    project_name: row.get(0)?,
                    main_request: row.get(1)?,
                })
            },
        )?;
        Ok(settings)
    }

    pub fn count_prompts(&self) -> AppResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM prompts", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn list_prompts(&self) -> AppResult<Vec<Prompt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, project_name FROM prompts ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], parse_prompt_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_prompt(&self, id: i64) -> AppResult<Option<Prompt>> {
        let conn = self.conn()?;
        select_prompt(&conn, id)
    }

    pub fn prompt_exists(&self, id: i64) -> AppResult<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM prompts WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// New prompts inherit the project name currently held in the settings row.
    pub fn insert_prompt(&self, title: &str, description: &str) -> AppResult<Prompt> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO prompts (title, description, project_name)
             VALUES (?1, ?2, COALESCE((SELECT project_name FROM project_settings WHERE id = 1), ''))",
            params![title, description],
        )?;
        let id = conn.last_insert_rowid();
        select_prompt(&conn, id)?
            .ok_or_else(|| AppError::Persist(format!("prompt {} vanished after insert", id)))
    }

    pub fn update_prompt(&self, id: i64, assignments: &[(PromptColumn, &str)]) -> AppResult<Option<Prompt>> {
        let conn = self.conn()?;
        if !assignments.is_empty() && apply_patch(&conn, id, assignments)? == 0 {
            return Ok(None);
        }
        select_prompt(&conn, id)
    }

    pub fn delete_prompt(&self, id: i64) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM prompts WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub fn list_nodes(&self, prompt_id: i64) -> AppResult<Vec<Node>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, prompt_id, name, action FROM nodes WHERE prompt_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([prompt_id], parse_node_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_node(&self, id: i64) -> AppResult<Option<Node>> {
        let conn = self.conn()?;
        select_node(&conn, id)
    }

    pub fn insert_node(&self, prompt_id: i64, name: &str, action: &str) -> AppResult<Node> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO nodes (prompt_id, name, action) VALUES (?1, ?2, ?3)",
            params![prompt_id, name, action],
        )?;
        Ok(Node {
            id: conn.last_insert_rowid(),
            prompt_id,
            name: name.to_string(),
            action: action.to_string(),
        })
    }

    pub fn update_node(&self, id: i64, assignments: &[(NodeColumn, &str)]) -> AppResult<Option<Node>> {
        let conn = self.conn()?;
        if !assignments.is_empty() && apply_patch(&conn, id, assignments)? == 0 {
            return Ok(None);
        }
        select_node(&conn, id)
    }

    pub fn delete_node(&self, id: i64) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM nodes WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub fn list_notes(&self, prompt_id: i64) -> AppResult<Vec<Note>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, prompt_id, content, created_at FROM notes
             WHERE prompt_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([prompt_id], parse_note_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_note(&self, id: i64) -> AppResult<Option<Note>> {
        let conn = self.conn()?;
        select_note(&conn, id)
    }

    pub fn insert_note(&self, prompt_id: i64, content: &str) -> AppResult<Note> {
        let created_at = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notes (prompt_id, content, created_at) VALUES (?1, ?2, ?3)",
            params![prompt_id, content, timestamp(created_at)],
        )?;
        let id = conn.last_insert_rowid();
        select_note(&conn, id)?.ok_or_else(|| AppError::Persist(format!("note {} vanished after insert", id)))
    }

    pub fn update_note(&self, id: i64, content: &str) -> AppResult<Option<Note>> {
        let conn = self.conn()?;
        if apply_patch(&conn, id, &[(NoteColumn::Content, content)])? == 0 {
            return Ok(None);
        }
        select_note(&conn, id)
    }

    pub fn delete_note(&self, id: i64) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM notes WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Replaces project settings and every prompt (with nodes and, by cascade,
    /// notes) in one transaction. Incoming ids are ignored. The transaction rolls
    /// back when dropped without commit, so any `?` below leaves prior state intact.
    pub fn replace_tree(&self, tree: &Tree) -> AppResult<ImportSummary> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let notes_discarded: i64 = tx.query_row("SELECT COUNT(1) FROM notes", [], |row| row.get(0))?;

        tx.execute(
            "INSERT INTO project_settings (id, project_name, main_request) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
               project_name = excluded.project_name,
               main_request = excluded.main_request",
            params![tree.project, tree.main_request],
        )?;

        tx.execute("DELETE FROM prompts", [])?;

        let mut summary = ImportSummary {
            prompts: 0,
            nodes: 0,
            notes_discarded: usize::try_from(notes_discarded).unwrap_or_default(),
        };
        {
            let mut insert_prompt = tx.prepare_cached(
                "INSERT INTO prompts (title, description, project_name) VALUES (?1, ?2, ?3)",
            )?;
            let mut insert_node =
                tx.prepare_cached("INSERT INTO nodes (prompt_id, name, action) VALUES (?1, ?2, ?3)")?;

            for prompt in &tree.prompts {
                let prompt_id = insert_prompt.insert(params![prompt.title, prompt.description, tree.project])?;
                summary.prompts += 1;
                for node in &prompt.nodes {
                    insert_node.execute(params![prompt_id, node.name, node.action])?;
                    summary.nodes += 1;
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    /// Inserts a snapshot or overwrites the payload of an existing one, keeping
    /// its original `created_at`.
    pub fn upsert_saved_tree(&self, name: &str, tree_data: &str) -> AppResult<SavedTreeInfo> {
        let now = timestamp(Utc::now());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO saved_trees (name, tree_data, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(name) DO UPDATE SET
               tree_data = excluded.tree_data,
               updated_at = excluded.updated_at",
            params![name, tree_data, now],
        )?;
        let info = conn.query_row(
            "SELECT name, created_at, updated_at FROM saved_trees WHERE name = ?1",
            [name],
            parse_saved_tree_info_row,
        )?;
        Ok(info)
    }

    pub fn get_saved_tree(&self, name: &str) -> AppResult<Option<SavedTreeRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT name, created_at, updated_at, tree_data FROM saved_trees WHERE name = ?1",
            [name],
            |row| {
                Ok(SavedTreeRecord {
                    info: parse_saved_tree_info_row(row)?,
                    tree_data: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_saved_trees(&self) -> AppResult<Vec<SavedTreeInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, created_at, updated_at FROM saved_trees ORDER BY updated_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], parse_saved_tree_info_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_saved_tree(&self, name: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM saved_trees WHERE name = ?1", [name])?;
        Ok(changed > 0)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn count_rows(&self, table: &str) -> AppResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(1) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Runs `UPDATE <table> SET c1 = ?1, c2 = ?2 WHERE id = ?N` for the supplied
/// assignments and returns the number of rows changed.
fn apply_patch<C: PatchColumn>(conn: &Connection, id: i64, assignments: &[(C, &str)]) -> AppResult<usize> {
    let sets = assignments
        .iter()
        .enumerate()
        .map(|(index, (column, _))| format!("{} = ?{}", column.name(), index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE {} SET {} WHERE id = ?{}", C::TABLE, sets, assignments.len() + 1);

    let mut values: Vec<&dyn ToSql> = assignments
        .iter()
        .map(|(_, value)| value as &dyn ToSql)
        .collect();
    values.push(&id);

    let changed = conn.execute(&sql, values.as_slice())?;
    Ok(changed)
}

fn select_prompt(conn: &Connection, id: i64) -> AppResult<Option<Prompt>> {
    conn.query_row(
        "SELECT id, title, description, project_name FROM prompts WHERE id = ?1",
        [id],
        parse_prompt_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn select_node(conn: &Connection, id: i64) -> AppResult<Option<Node>> {
    conn.query_row(
        "SELECT id, prompt_id, name, action FROM nodes WHERE id = ?1",
        [id],
        parse_node_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn select_note(conn: &Connection, id: i64) -> AppResult<Option<Note>> {
    conn.query_row(
        "SELECT id, prompt_id, content, created_at FROM notes WHERE id = ?1",
        [id],
        parse_note_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn parse_prompt_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Prompt> {
    Ok(Prompt {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        project_name: row.get(3)?,
    })
}

fn parse_node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        prompt_id: row.get(1)?,
        name: row.get(2)?,
        action: row.get(3)?,
    })
}

fn parse_note_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        prompt_id: row.get(1)?,
        content: row.get(2)?,
        created_at: parse_time(&row.get::<_, String>(3)?)?,
    })
}

fn parse_saved_tree_info_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedTreeInfo> {
    Ok(SavedTreeInfo {
        name: row.get(0)?,
        created_at: parse_time(&row.get::<_, String>(1)?)?,
        updated_at: parse_time(&row.get::<_, String>(2)?)?,
    })
}

/// Fixed-width RFC 3339 so text ordering in SQL matches chronological ordering.
fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}
