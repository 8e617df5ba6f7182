use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, log_activity, optional_bool, optional_i64, optional_str, parse_grade_level,
    require_role, required_i64, required_str, Role,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
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

    let mut clauses: Vec<&str> = Vec::new();
    if !include_deleted {
        clauses.push("sec.deleted_at IS NULL");
    }
    if strand_id.is_some() {
        clauses.push("sec.strand_id = ?");
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT sec.id, sec.name, sec.strand_id, str.code, sec.grade_level, sec.capacity,
                sec.deleted_at,
                (SELECT COUNT(*) FROM students st
                  WHERE st.section_id = sec.id
                    AND st.status = 'enrolled'
                    AND st.deleted_at IS NULL) AS enrolled_count
         FROM sections sec JOIN strands str ON str.id = sec.strand_id
         {} ORDER BY sec.grade_level, sec.name",
        where_sql
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "name": row.get::<_, String>(1)?,
            "strandId": row.get::<_, String>(2)?,
            "strandCode": row.get::<_, String>(3)?,
            "gradeLevel": row.get::<_, i64>(4)?,
            "capacity": row.get::<_, i64>(5)?,
            "deletedAt": row.get::<_, Option<String>>(6)?,
            "enrolledCount": row.get::<_, i64>(7)?,
        }))
    };

    let rows = if let Some(ref sid) = strand_id {
        stmt.query_map([sid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };
    match rows {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
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
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let strand_id = match required_str(req, "strandId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grade_level = match parse_grade_level(req, "gradeLevel") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let capacity = match required_i64(req, "capacity") {
        Ok(v) if v > 0 => v,
        Ok(_) => return err(&req.id, "bad_params", "capacity must be positive", None),
        Err(resp) => return resp,
    };

    let strand: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM strands WHERE id = ? AND deleted_at IS NULL",
            [&strand_id],
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

    let dup: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM sections
             WHERE name = ? AND strand_id = ? AND grade_level = ? AND deleted_at IS NULL",
            (&name, &strand_id, grade_level),
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
            "a section with this name already exists for the strand and grade",
            None,
        );
    }

    let section_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sections(id, name, strand_id, grade_level, capacity, created_at)
         VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&section_id, &name, &strand_id, grade_level, capacity),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "sections.create",
        &format!("created section {} (grade {})", name, grade_level),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "id": section_id }))
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
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let current: Option<(String, i64)> = match conn
        .query_row(
            "SELECT name, capacity FROM sections WHERE id = ? AND deleted_at IS NULL",
            [&section_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((current_name, _)) = current else {
        return err(&req.id, "not_found", "section not found", None);
    };

    let name = optional_str(req, "name");
    let capacity = optional_i64(req, "capacity");
    if name.is_none() && capacity.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    if let Some(capacity) = capacity {
        if capacity <= 0 {
            return err(&req.id, "bad_params", "capacity must be positive", None);
        }
        // Shrinking below the current headcount would break the capacity
        // invariant retroactively.
        let enrolled: i64 = match conn.query_row(
            "SELECT COUNT(*) FROM students
             WHERE section_id = ? AND status = 'enrolled' AND deleted_at IS NULL",
            [&section_id],
            |r| r.get(0),
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if capacity < enrolled {
            return err(
                &req.id,
                "conflict",
                "capacity is below the current enrolled count",
                Some(json!({ "enrolledCount": enrolled, "capacity": capacity })),
            );
        }
        if let Err(e) = conn.execute(
            "UPDATE sections SET capacity = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (capacity, &section_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(ref name) = name {
        if let Err(e) = conn.execute(
            "UPDATE sections SET name = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (name, &section_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    log_activity(
        conn,
        Some(&user.id),
        "sections.update",
        &format!("updated section {}", current_name),
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
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let assigned: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE section_id = ? AND deleted_at IS NULL",
        [&section_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if assigned > 0 {
        return err(
            &req.id,
            "conflict",
            "section has assigned students and cannot be deleted",
            Some(json!({ "studentCount": assigned })),
        );
    }

    let updated = match conn.execute(
        "UPDATE sections SET deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND deleted_at IS NULL",
        [&section_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "section not found", None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "sections.delete",
        &format!("deleted section {}", section_id),
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
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let updated = match conn.execute(
        "UPDATE sections SET deleted_at = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND deleted_at IS NOT NULL",
        [&section_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "deleted section not found", None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "sections.restore",
        &format!("restored section {}", section_id),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "restored": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sections.list" => Some(handle_list(state, req)),
        "sections.create" => Some(handle_create(state, req)),
        "sections.update" => Some(handle_update(state, req)),
        "sections.delete" => Some(handle_delete(state, req)),
        "sections.restore" => Some(handle_restore(state, req)),
        _ => None,
    }
}
