//! CLI smoke entry point.
//!
//! # Responsibility
//! - Run one put/get/delete cycle against a real SQLite store.
//! - Print each result and each published change as one JSON line.
//!
//! # Environment
//! - `TYPEDSTORE_DB`: database path; in-memory when unset.
//! - `TYPEDSTORE_LOG_DIR` / `TYPEDSTORE_LOG_LEVEL`: optional file logging.

use rusqlite::types::Value;
use serde_json::json;
use std::process::ExitCode;
use typedstore_core::{
    init_logging, BoxError, DeleteQuery, Filter, LogConfig, PreparedOperation, Query, RawQuery,
    Row, RowMapper, SqliteBackend, StorageLocation, Store, TypeMapping,
};

const DB_ENV: &str = "TYPEDSTORE_DB";
const NOTES: &str = "notes";

#[derive(Debug, Clone, PartialEq)]
struct Note {
    id: Option<i64>,
    title: String,
}

struct NoteMapper;

impl RowMapper<Note> for NoteMapper {
    fn location(&self) -> StorageLocation {
        StorageLocation::table(NOTES)
    }

    fn to_row(&self, note: &Note) -> Row {
        let mut row = Row::new().with("title", note.title.clone());
        if let Some(id) = note.id {
            row.put("_id", id);
        }
        row
    }

    fn from_row(&self, row: &Row) -> Result<Note, BoxError> {
        Ok(Note {
            id: row.opt_i64("_id")?,
            title: row.text("title")?,
        })
    }

    fn key_filter(&self, note: &Note) -> Option<Filter> {
        note.id.map(|id| Filter::eq("_id", id))
    }
}

fn main() -> ExitCode {
    if let Some(config) = LogConfig::from_env() {
        if let Err(err) = init_logging(&config) {
            eprintln!("typedstore logging disabled: {err}");
        }
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("event=cli_run module=cli status=error error={err}");
            eprintln!("typedstore error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), BoxError> {
    let backend = match std::env::var_os(DB_ENV) {
        Some(path) => SqliteBackend::open(path)?,
        None => SqliteBackend::open_in_memory()?,
    };
    let store = Store::builder()
        .backend(backend)
        .add_type_mapping(TypeMapping::from_mapper(NoteMapper))?
        .build()?;
    let mut changes = store.observe_changes();

    store
        .execute_sql()
        .with_query(
            RawQuery::builder()
                .statement(
                    "CREATE TABLE IF NOT EXISTS notes (_id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL);",
                )
                .affects([NOTES])
                .build(),
        )
        .prepare()
        .execute()?;

    let puts = store
        .put()
        .objects(vec![
            Note {
                id: None,
                title: "first".to_string(),
            },
            Note {
                id: None,
                title: "second".to_string(),
            },
        ])
        .prepare()
        .execute()?;
    for (note, result) in puts.iter() {
        println!(
            "{}",
            json!({ "op": "put", "title": note.title, "result": result })
        );
    }

    let all_notes = Query::builder().table(NOTES).order_by("_id").build();
    let notes = store
        .get()
        .list_of_objects::<Note>()
        .with_query(all_notes.clone())
        .prepare()
        .execute()?;
    if let Some(first) = notes.first() {
        let renamed = Note {
            title: format!("{} (edited)", first.title),
            ..first.clone()
        };
        let result = store.put().object(renamed).prepare().execute()?;
        println!("{}", json!({ "op": "put", "result": result }));
    }

    let rows = store
        .get()
        .rows()
        .with_query(all_notes.clone())
        .prepare()
        .execute()?;
    for row in &rows {
        println!("{}", json!({ "op": "get", "row": row_to_json(row) }));
    }

    let deleted = store
        .delete()
        .by_query(DeleteQuery::new(
            NOTES,
            Some(Filter::eq("title", "second".to_string())),
        ))
        .prepare()
        .execute()?;
    println!("{}", json!({ "op": "delete", "result": deleted }));

    let remaining = store
        .get()
        .number_of_results()
        .with_query(all_notes)
        .prepare()
        .execute()?;
    println!("{}", json!({ "op": "count", "result": remaining }));

    while let Some(change) = changes.try_recv() {
        println!("{}", json!({ "op": "change", "changes": change }));
    }
    Ok(())
}

fn row_to_json(row: &Row) -> serde_json::Value {
    row.iter()
        .map(|(column, value)| (column.to_string(), value_to_json(value)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(v) => json!(v),
        Value::Real(v) => json!(v),
        Value::Text(v) => json!(v),
        Value::Blob(v) => json!(v),
    }
}
