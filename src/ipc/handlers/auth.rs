use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{authenticate, db_conn, log_activity, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const SESSION_TTL_HOURS: i64 = 12;

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row = match conn
        .query_row(
            "SELECT id, password_hash, display_name, role, active
             FROM users WHERE username = ? AND deleted_at IS NULL",
            [&username],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)? != 0,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some((user_id, password_hash, display_name, role, active)) = row else {
        return err(&req.id, "unauthorized", "invalid credentials", None);
    };
    if !db::verify_password(&password_hash, &password) {
        log_activity(
            conn,
            Some(&user_id),
            "auth.login_failed",
            &format!("failed login for {}", username),
            req.client_ip.as_deref(),
        );
        return err(&req.id, "unauthorized", "invalid credentials", None);
    }
    if !active {
        return err(&req.id, "unauthorized", "account is inactive", None);
    }

    // Expired rows are already invisible to token lookup; sweeping them on
    // login keeps the table from growing without bound.
    let _ = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= strftime('%Y-%m-%dT%H:%M:%SZ','now')",
        [],
    );

    let token = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at)
         VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                strftime('%Y-%m-%dT%H:%M:%SZ','now', ?))",
        (&token, &user_id, format!("+{} hours", SESSION_TTL_HOURS)),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&user_id),
        "auth.login",
        &format!("{} logged in", username),
        req.client_ip.as_deref(),
    );

    ok(
        &req.id,
        json!({
            "token": token,
            "user": {
                "id": user_id,
                "username": username,
                "displayName": display_name,
                "role": role
            }
        }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(token) = req.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return err(&req.id, "unauthorized", "missing token", None);
    };
    match conn.execute("DELETE FROM sessions WHERE token = ?", [token]) {
        Ok(_) => ok(&req.id, json!({ "loggedOut": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_me(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match authenticate(conn, req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        json!({
            "id": user.id,
            "username": user.username,
            "displayName": user.display_name,
            "role": user.role
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.me" => Some(handle_me(state, req)),
        _ => None,
    }
}
