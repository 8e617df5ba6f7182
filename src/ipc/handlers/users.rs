use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, log_activity, optional_str, require_role, required_str, Role,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value as SqlValue, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parse_role(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let role = required_str(req, key)?.to_ascii_lowercase();
    if role != "admin" && role != "staff" {
        return Err(err(
            &req.id,
            "bad_params",
            "role must be one of: admin, staff",
            None,
        ));
    }
    Ok(role)
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Admin) {
        return resp;
    }
    let mut stmt = match conn.prepare(
        "SELECT id, username, display_name, role, active, created_at
         FROM users WHERE deleted_at IS NULL ORDER BY username",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "username": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "role": row.get::<_, String>(3)?,
                "active": row.get::<_, i64>(4)? != 0,
                "createdAt": row.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let admin = match require_role(conn, req, Role::Admin) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if password.len() < 8 {
        return err(
            &req.id,
            "bad_params",
            "password must be at least 8 characters",
            None,
        );
    }
    let display_name = match required_str(req, "displayName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role = match parse_role(req, "role") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let taken: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(&req.id, "conflict", "username already exists", None);
    }

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, password_hash, display_name, role, active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &user_id,
            &username,
            db::hash_password(&password),
            &display_name,
            &role,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&admin.id),
        "users.create",
        &format!("created {} account {}", role, username),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "id": user_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let admin = match require_role(conn, req, Role::Admin) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND deleted_at IS NULL",
            [&user_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    // Validate everything first; the write happens as one statement so a
    // rejected request changes nothing.
    let display_name = optional_str(req, "displayName");
    let password = optional_str(req, "password");
    if let Some(ref password) = password {
        if password.len() < 8 {
            return err(
                &req.id,
                "bad_params",
                "password must be at least 8 characters",
                None,
            );
        }
    }
    let role = match req.params.get("role") {
        Some(_) => match parse_role(req, "role") {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };
    if display_name.is_none() && password.is_none() && role.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }
    if role.is_some() && user_id == admin.id {
        // An admin demoting themselves could lock everyone out.
        return err(&req.id, "bad_params", "cannot change your own role", None);
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(display_name) = display_name {
        sets.push("display_name = ?");
        binds.push(SqlValue::Text(display_name));
    }
    if let Some(ref password) = password {
        sets.push("password_hash = ?");
        binds.push(SqlValue::Text(db::hash_password(password)));
    }
    if let Some(role) = role {
        sets.push("role = ?");
        binds.push(SqlValue::Text(role));
    }
    let sql = format!(
        "UPDATE users SET {}, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        sets.join(", ")
    );
    binds.push(SqlValue::Text(user_id.clone()));
    if let Err(e) = conn.execute(&sql, params_from_iter(binds)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&admin.id),
        "users.update",
        &format!("updated account {}", user_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "updated": true }))
}

fn handle_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let admin = match require_role(conn, req, Role::Admin) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing active", None);
    };
    if user_id == admin.id && !active {
        return err(&req.id, "bad_params", "cannot deactivate yourself", None);
    }

    let updated = match conn.execute(
        "UPDATE users SET active = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND deleted_at IS NULL",
        (active as i64, &user_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "user not found", None);
    }
    if !active {
        // Revoke live sessions immediately.
        if let Err(e) = conn.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id]) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    log_activity(
        conn,
        Some(&admin.id),
        "users.setActive",
        &format!(
            "{} account {}",
            if active { "activated" } else { "deactivated" },
            user_id
        ),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "active": active }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let admin = match require_role(conn, req, Role::Admin) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if user_id == admin.id {
        return err(&req.id, "bad_params", "cannot delete yourself", None);
    }

    let updated = match conn.execute(
        "UPDATE users SET deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND deleted_at IS NULL",
        [&user_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "user not found", None);
    }
    if let Err(e) = conn.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id]) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&admin.id),
        "users.delete",
        &format!("deleted account {}", user_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_list(state, req)),
        "users.create" => Some(handle_create(state, req)),
        "users.update" => Some(handle_update(state, req)),
        "users.setActive" => Some(handle_set_active(state, req)),
        "users.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
