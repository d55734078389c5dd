use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rusqlite::{
    params, params_from_iter, types::Type, types::Value as SqlValue, Connection,
    OptionalExtension, Row,
};
use thiserror::Error;
use tracing::debug;

use crate::model::{self, format_timestamp, parse_timestamp, NewTodo, Todo, TodoChanges, TodoField};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("sqlite: {0}")]
    RusqliteError(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not determine home directory")]
    NoHomeDir,
}

pub type SqlResult<T> = std::result::Result<T, DatabaseError>;

const COLUMNS: &str = "id, title, description, completed, created_at, updated_at";

/// Where the store lives when no path is configured: `$HOME/.todoinfo/todos.sqlite`.
pub fn default_path() -> SqlResult<PathBuf> {
    let home_dir: PathBuf = env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(DatabaseError::NoHomeDir)?;
    Ok(home_dir.join(".todoinfo").join("todos.sqlite"))
}

/// Restricts which todos a listing returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoFilter {
    /// Every term must match at least one of the search fields.
    pub search_terms: Vec<String>,
    pub search_fields: Vec<TodoField>,
    pub completed: Option<bool>,
    /// Half-open `[start, end)` range on `created_at`.
    pub created_between: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: TodoField,
    pub descending: bool,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> SqlResult<Database> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Database { conn };
        db.init_db()?;
        debug!(path = %path.display(), "opened database");
        Ok(db)
    }

    pub fn open_in_memory() -> SqlResult<Database> {
        let db = Database {
            conn: Connection::open_in_memory()?,
        };
        db.init_db()?;
        Ok(db)
    }

    fn init_db(&self) -> SqlResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS todos (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                completed BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            params![],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS todos_created_at ON todos (created_at)",
            params![],
        )?;
        Ok(())
    }

    pub fn add_todo(&mut self, todo: &NewTodo) -> SqlResult<Todo> {
        self.add_todo_at(todo, model::now())
    }

    pub fn add_todo_at(&mut self, todo: &NewTodo, at: DateTime<Utc>) -> SqlResult<Todo> {
        let stamp = format_timestamp(&at);
        self.conn.execute(
            "INSERT INTO todos (title, description, completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![todo.title, todo.description, todo.completed, stamp],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, "inserted todo");
        self.fetch_todo(id)?
            .ok_or(DatabaseError::RusqliteError(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn fetch_todo(&self, id: i64) -> SqlResult<Option<Todo>> {
        let todo = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM todos WHERE id = ?1"),
                params![id],
                map_todo,
            )
            .optional()?;
        Ok(todo)
    }

    /// Every todo, oldest id first.
    pub fn fetch_todos(&self) -> SqlResult<Vec<Todo>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM todos ORDER BY id"))?;
        let rows = stmt.query_map(params![], map_todo)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Applies `changes` and refreshes `updated_at`, even when nothing else
    /// changed. Returns `None` when no todo has this id.
    pub fn update_todo(&mut self, id: i64, changes: &TodoChanges) -> SqlResult<Option<Todo>> {
        self.update_todo_at(id, changes, model::now())
    }

    pub fn update_todo_at(
        &mut self,
        id: i64,
        changes: &TodoChanges,
        at: DateTime<Utc>,
    ) -> SqlResult<Option<Todo>> {
        let tx = self.conn.transaction()?;
        let current = tx
            .query_row(
                &format!("SELECT {COLUMNS} FROM todos WHERE id = ?1"),
                params![id],
                map_todo,
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(None);
        };

        let updated = Todo {
            title: changes.title.clone().unwrap_or(current.title),
            description: changes.description.clone().unwrap_or(current.description),
            completed: changes.completed.unwrap_or(current.completed),
            updated_at: at.max(current.created_at),
            ..current
        };
        tx.execute(
            "UPDATE todos SET
                title = ?2,
                description = ?3,
                completed = ?4,
                updated_at = ?5
            WHERE id = ?1",
            params![
                id,
                updated.title,
                updated.description,
                updated.completed,
                format_timestamp(&updated.updated_at)
            ],
        )?;
        tx.commit()?;
        debug!(id, "updated todo");
        Ok(Some(updated))
    }

    pub fn toggle_todo_completion(&mut self, id: i64, completed: bool) -> SqlResult<Option<Todo>> {
        self.update_todo(
            id,
            &TodoChanges {
                completed: Some(completed),
                ..TodoChanges::default()
            },
        )
    }

    /// Returns whether a row was removed.
    pub fn delete_todo(&mut self, id: i64) -> SqlResult<bool> {
        let removed = self.conn.execute("DELETE FROM todos WHERE id = ?1", params![id])?;
        debug!(id, removed, "deleted todo");
        Ok(removed > 0)
    }

    pub fn count_todos(&self, filter: &TodoFilter) -> SqlResult<usize> {
        let (clause, values) = where_clause(filter);
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM todos{clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn query_todos(
        &self,
        filter: &TodoFilter,
        order: OrderBy,
        limit: usize,
        offset: usize,
    ) -> SqlResult<Vec<Todo>> {
        let (clause, mut values) = where_clause(filter);
        let direction = if order.descending { "DESC" } else { "ASC" };
        let ordering = match order.field {
            TodoField::Id => format!("id {direction}"),
            field => format!("{} {direction}, id {direction}", field.name()),
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM todos{clause} ORDER BY {ordering} LIMIT ? OFFSET ?"
        );
        values.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        values.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
        debug!(%sql, "querying todos");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), map_todo)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn where_clause(filter: &TodoFilter) -> (String, Vec<SqlValue>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if !filter.search_fields.is_empty() {
        for term in &filter.search_terms {
            let pattern = format!("%{}%", escape_like(term));
            let any_field: Vec<String> = filter
                .search_fields
                .iter()
                .map(|field| {
                    values.push(SqlValue::Text(pattern.clone()));
                    format!("{} LIKE ? ESCAPE '\\'", field.name())
                })
                .collect();
            conditions.push(format!("({})", any_field.join(" OR ")));
        }
    }

    if let Some(completed) = filter.completed {
        conditions.push("completed = ?".to_string());
        values.push(SqlValue::Integer(i64::from(completed)));
    }

    if let Some((start, end)) = &filter.created_between {
        conditions.push("created_at >= ? AND created_at < ?".to_string());
        values.push(SqlValue::Text(format_timestamp(start)));
        values.push(SqlValue::Text(format_timestamp(end)));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn map_todo(row: &Row<'_>) -> rusqlite::Result<Todo> {
    Ok(Todo {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        completed: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
        updated_at: timestamp_column(row, 5)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    parse_timestamp(&text)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}
