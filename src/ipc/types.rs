use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;

/// One line of stdin: `{"id": "...", "method": "courses.list", "params": {...}}`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Both fields are set together by `workspace.select` and stay in sync;
/// every data method requires an open connection.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
