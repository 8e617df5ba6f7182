use serde_json::json;

use super::handlers;
use super::helpers;
use super::types::{AppState, Request};
use crate::db;
use crate::ipc::error::err;

const MAINTENANCE_RETRY_AFTER_SECONDS: i64 = 300;

/// Methods that must stay reachable while maintenance mode is on; without
/// auth.login an admin could never turn the flag back off.
fn gate_exempt(method: &str) -> bool {
    matches!(
        method,
        "health" | "workspace.select" | "auth.login" | "auth.logout"
    )
}

/// Reads the settings row on every request. A missing row means the gate is
/// open. Admin callers always pass.
fn maintenance_gate(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let conn = state.db.as_ref()?;
    match db::maintenance_mode_enabled(conn) {
        Ok(false) => None,
        Ok(true) => {
            if let Ok(user) = helpers::authenticate(conn, req) {
                if user.role == "admin" {
                    return None;
                }
            }
            Some(err(
                &req.id,
                "maintenance_mode",
                "the system is under maintenance, try again later",
                Some(json!({ "retryAfterSeconds": MAINTENANCE_RETRY_AFTER_SECONDS })),
            ))
        }
        Err(e) => Some(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if !gate_exempt(&req.method) {
        if let Some(resp) = maintenance_gate(state, &req) {
            return resp;
        }
    }

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::enrollment::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::strands::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::sections::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::settings::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::logs::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup_exchange::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
