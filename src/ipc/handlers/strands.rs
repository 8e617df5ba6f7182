use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, log_activity, optional_bool, optional_str, require_role, required_str, Role,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn strand_exists(conn: &Connection, id: &str, include_deleted: bool) -> rusqlite::Result<bool> {
    let sql = if include_deleted {
        "SELECT 1 FROM strands WHERE id = ?"
    } else {
        "SELECT 1 FROM strands WHERE id = ? AND deleted_at IS NULL"
    };
    Ok(conn
        .query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }
    let include_deleted = optional_bool(req, "includeDeleted").unwrap_or(false);

    let sql = format!(
        "SELECT s.id, s.code, s.description, s.deleted_at,
                (SELECT COUNT(*) FROM students st
                  WHERE st.strand_id = s.id AND st.deleted_at IS NULL) AS student_count
         FROM strands s {} ORDER BY s.code",
        if include_deleted {
            ""
        } else {
            "WHERE s.deleted_at IS NULL"
        }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "code": row.get::<_, String>(1)?,
                "description": row.get::<_, String>(2)?,
                "deletedAt": row.get::<_, Option<String>>(3)?,
                "studentCount": row.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(strands) => ok(&req.id, json!({ "strands": strands })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match require_role(conn, req, Role::Staff) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(resp) => return resp,
    };
    let description = match required_str(req, "description") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM strands WHERE code = ? AND deleted_at IS NULL",
            [&code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "conflict",
            "strand code already exists",
            Some(json!({ "code": code })),
        );
    }

    let strand_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO strands(id, code, description, created_at)
         VALUES(?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&strand_id, &code, &description),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "strands.create",
        &format!("created strand {}", code),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "id": strand_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match require_role(conn, req, Role::Staff) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let strand_id = match required_str(req, "strandId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match strand_exists(conn, &strand_id, false) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "strand not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let code = optional_str(req, "code").map(|c| c.to_ascii_uppercase());
    let description = optional_str(req, "description");
    if code.is_none() && description.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    if let Some(ref code) = code {
        let taken: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM strands WHERE code = ? AND id != ? AND deleted_at IS NULL",
                [code, &strand_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if taken.is_some() {
            return err(&req.id, "conflict", "strand code already exists", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE strands SET code = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (code, &strand_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(ref description) = description {
        if let Err(e) = conn.execute(
            "UPDATE strands SET description = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (description, &strand_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    log_activity(
        conn,
        Some(&user.id),
        "strands.update",
        &format!("updated strand {}", strand_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "updated": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match require_role(conn, req, Role::Admin) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let strand_id = match required_str(req, "strandId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match strand_exists(conn, &strand_id, false) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "strand not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // A strand with active students cannot be removed; drop or move the
    // students first.
    let referencing: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE strand_id = ? AND deleted_at IS NULL",
        [&strand_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if referencing > 0 {
        return err(
            &req.id,
            "conflict",
            "strand has active students and cannot be deleted",
            Some(json!({ "studentCount": referencing })),
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE strands SET deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
        [&strand_id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "strands.delete",
        &format!("deleted strand {}", strand_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "deleted": true }))
}

fn handle_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match require_role(conn, req, Role::Admin) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let strand_id = match required_str(req, "strandId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let updated = match conn.execute(
        "UPDATE strands SET deleted_at = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND deleted_at IS NOT NULL",
        [&strand_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "deleted strand not found", None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "strands.restore",
        &format!("restored strand {}", strand_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "restored": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "strands.list" => Some(handle_list(state, req)),
        "strands.create" => Some(handle_create(state, req)),
        "strands.update" => Some(handle_update(state, req)),
        "strands.delete" => Some(handle_delete(state, req)),
        "strands.restore" => Some(handle_restore(state, req)),
        _ => None,
    }
}
