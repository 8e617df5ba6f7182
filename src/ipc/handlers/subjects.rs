use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, log_activity, optional_bool, optional_i64, optional_str, parse_grade_level,
    parse_semester, require_role, required_str, Role,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value as SqlValue, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }
    let include_deleted = optional_bool(req, "includeDeleted").unwrap_or(false);
    let strand_id = optional_str(req, "strandId");
    let grade_level = optional_i64(req, "gradeLevel");
    let semester = optional_i64(req, "semester");

    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    if !include_deleted {
        clauses.push("sub.deleted_at IS NULL".into());
    }
    if let Some(sid) = strand_id {
        // Core subjects (NULL strand) apply to every strand.
        clauses.push("(sub.strand_id = ? OR sub.strand_id IS NULL)".into());
        binds.push(SqlValue::Text(sid));
    }
    if let Some(g) = grade_level {
        clauses.push("sub.grade_level = ?".into());
        binds.push(SqlValue::Integer(g));
    }
    if let Some(s) = semester {
        clauses.push("sub.semester = ?".into());
        binds.push(SqlValue::Integer(s));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT sub.id, sub.code, sub.description, sub.grade_level, sub.semester,
                sub.strand_id, str.code, sub.deleted_at
         FROM subjects sub LEFT JOIN strands str ON str.id = sub.strand_id
         {} ORDER BY sub.grade_level, sub.semester, sub.code",
        where_sql
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "code": row.get::<_, String>(1)?,
                "description": row.get::<_, String>(2)?,
                "gradeLevel": row.get::<_, i64>(3)?,
                "semester": row.get::<_, i64>(4)?,
                "strandId": row.get::<_, Option<String>>(5)?,
                "strandCode": row.get::<_, Option<String>>(6)?,
                "deletedAt": row.get::<_, Option<String>>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
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
    let grade_level = match parse_grade_level(req, "gradeLevel") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let semester = match parse_semester(req, "semester") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Absent strand means a core subject offered to all strands.
    let strand_id = optional_str(req, "strandId");

    if let Some(ref sid) = strand_id {
        let strand: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM strands WHERE id = ? AND deleted_at IS NULL",
                [sid],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if strand.is_none() {
            return err(&req.id, "not_found", "strand not found", None);
        }
    }

    let dup: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM subjects
             WHERE code = ? AND grade_level = ? AND semester = ? AND deleted_at IS NULL",
            (&code, grade_level, semester),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup.is_some() {
        return err(
            &req.id,
            "conflict",
            "subject code already exists for this grade and semester",
            Some(json!({ "code": code })),
        );
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, code, description, grade_level, strand_id, semester, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &subject_id,
            &code,
            &description,
            grade_level,
            strand_id.as_deref(),
            semester,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "subjects.create",
        &format!("created subject {}", code),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "id": subject_id }))
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
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ? AND deleted_at IS NULL",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let code = optional_str(req, "code").map(|c| c.to_ascii_uppercase());
    let description = optional_str(req, "description");
    if code.is_none() && description.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }
    if let Some(ref code) = code {
        if let Err(e) = conn.execute(
            "UPDATE subjects SET code = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (code, &subject_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(ref description) = description {
        if let Err(e) = conn.execute(
            "UPDATE subjects SET description = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (description, &subject_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    log_activity(
        conn,
        Some(&user.id),
        "subjects.update",
        &format!("updated subject {}", subject_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "updated": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match require_role(conn, req, Role::Staff) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let updated = match conn.execute(
        "UPDATE subjects SET deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND deleted_at IS NULL",
        [&subject_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "subject not found", None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "subjects.delete",
        &format!("deleted subject {}", subject_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "deleted": true }))
}

fn handle_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match require_role(conn, req, Role::Staff) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let updated = match conn.execute(
        "UPDATE subjects SET deleted_at = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND deleted_at IS NOT NULL",
        [&subject_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "deleted subject not found", None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "subjects.restore",
        &format!("restored subject {}", subject_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "restored": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_list(state, req)),
        "subjects.create" => Some(handle_create(state, req)),
        "subjects.update" => Some(handle_update(state, req)),
        "subjects.delete" => Some(handle_delete(state, req)),
        "subjects.restore" => Some(handle_restore(state, req)),
        _ => None,
    }
}
