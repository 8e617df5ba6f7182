use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Bearer token issued by auth.login. Absent for public methods.
    #[serde(default)]
    pub token: Option<String>,
    /// Originating client address, forwarded by the shell for the audit log.
    #[serde(default, rename = "clientIp")]
    pub client_ip: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
