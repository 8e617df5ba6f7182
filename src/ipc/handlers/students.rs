use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, log_activity, optional_str, parse_gender, parse_grade_level, parse_lrn, require_role,
    required_str, Role, STATUSES,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const STUDENT_COLUMNS: &str = "st.id, st.lrn, st.last_name, st.first_name, st.middle_name,
    st.suffix, st.gender, st.birth_date, st.email, st.phone, st.address,
    st.guardian_name, st.guardian_phone, st.last_school, st.school_year,
    st.grade_level, st.strand_id, str.code, st.section_id, sec.name, st.status,
    st.created_at, st.updated_at, st.deleted_at";

fn student_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "lrn": row.get::<_, String>(1)?,
        "lastName": row.get::<_, String>(2)?,
        "firstName": row.get::<_, String>(3)?,
        "middleName": row.get::<_, Option<String>>(4)?,
        "suffix": row.get::<_, Option<String>>(5)?,
        "gender": row.get::<_, String>(6)?,
        "birthDate": row.get::<_, Option<String>>(7)?,
        "email": row.get::<_, Option<String>>(8)?,
        "phone": row.get::<_, Option<String>>(9)?,
        "address": row.get::<_, Option<String>>(10)?,
        "guardianName": row.get::<_, Option<String>>(11)?,
        "guardianPhone": row.get::<_, Option<String>>(12)?,
        "lastSchool": row.get::<_, Option<String>>(13)?,
        "schoolYear": row.get::<_, String>(14)?,
        "gradeLevel": row.get::<_, i64>(15)?,
        "strandId": row.get::<_, String>(16)?,
        "strandCode": row.get::<_, Option<String>>(17)?,
        "sectionId": row.get::<_, Option<String>>(18)?,
        "sectionName": row.get::<_, Option<String>>(19)?,
        "status": row.get::<_, String>(20)?,
        "createdAt": row.get::<_, Option<String>>(21)?,
        "updatedAt": row.get::<_, Option<String>>(22)?,
        "deletedAt": row.get::<_, Option<String>>(23)?,
    }))
}

fn load_student(
    conn: &Connection,
    student_id: &str,
    include_deleted: bool,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let sql = format!(
        "SELECT {} FROM students st
         JOIN strands str ON str.id = st.strand_id
         LEFT JOIN sections sec ON sec.id = st.section_id
         WHERE st.id = ?{}",
        STUDENT_COLUMNS,
        if include_deleted {
            ""
        } else {
            " AND st.deleted_at IS NULL"
        }
    );
    conn.query_row(&sql, [student_id], student_json).optional()
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }

    let mut clauses: Vec<String> = vec![];
    let mut binds: Vec<SqlValue> = vec![];
    let include_deleted = req
        .params
        .get("includeDeleted")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !include_deleted {
        clauses.push("st.deleted_at IS NULL".into());
    }
    if let Some(status) = optional_str(req, "status") {
        let status = status.to_ascii_lowercase();
        if !STATUSES.contains(&status.as_str()) {
            return err(
                &req.id,
                "bad_params",
                format!("status must be one of: {}", STATUSES.join(", ")),
                None,
            );
        }
        clauses.push("st.status = ?".into());
        binds.push(SqlValue::Text(status));
    }
    if let Some(sid) = optional_str(req, "strandId") {
        clauses.push("st.strand_id = ?".into());
        binds.push(SqlValue::Text(sid));
    }
    if let Some(sid) = optional_str(req, "sectionId") {
        clauses.push("st.section_id = ?".into());
        binds.push(SqlValue::Text(sid));
    }
    if let Some(year) = optional_str(req, "schoolYear") {
        clauses.push("st.school_year = ?".into());
        binds.push(SqlValue::Text(year));
    }
    if let Some(search) = optional_str(req, "search") {
        clauses.push("(st.lrn LIKE ? OR st.last_name LIKE ? OR st.first_name LIKE ?)".into());
        let pattern = format!("%{}%", search);
        binds.push(SqlValue::Text(pattern.clone()));
        binds.push(SqlValue::Text(pattern.clone()));
        binds.push(SqlValue::Text(pattern));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM students st
         JOIN strands str ON str.id = st.strand_id
         LEFT JOIN sections sec ON sec.id = st.section_id
         {} ORDER BY st.last_name, st.first_name",
        STUDENT_COLUMNS, where_sql
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match load_student(conn, &student_id, true) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub struct StudentInput {
    pub lrn: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub suffix: Option<String>,
    pub gender: String,
    pub birth_date: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub last_school: Option<String>,
    pub school_year: String,
    pub grade_level: i64,
    pub strand_id: String,
}

/// The school year is supplied by the caller: staff pass it explicitly,
/// public submissions are stamped with the year from the settings row.
pub fn parse_student_input(
    req: &Request,
    school_year: String,
) -> Result<StudentInput, serde_json::Value> {
    Ok(StudentInput {
        lrn: parse_lrn(req, "lrn")?,
        last_name: required_str(req, "lastName")?,
        first_name: required_str(req, "firstName")?,
        middle_name: optional_str(req, "middleName"),
        suffix: optional_str(req, "suffix"),
        gender: parse_gender(req, "gender")?,
        birth_date: optional_str(req, "birthDate"),
        email: optional_str(req, "email"),
        phone: optional_str(req, "phone"),
        address: optional_str(req, "address"),
        guardian_name: optional_str(req, "guardianName"),
        guardian_phone: optional_str(req, "guardianPhone"),
        last_school: optional_str(req, "lastSchool"),
        school_year,
        grade_level: parse_grade_level(req, "gradeLevel")?,
        strand_id: required_str(req, "strandId")?,
    })
}

/// Shared by staff creation and the public enrollment wizard. Inserts a
/// pending student after LRN/strand validation.
pub fn insert_pending_student(
    conn: &Connection,
    req: &Request,
    input: &StudentInput,
) -> Result<String, serde_json::Value> {
    let strand: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM strands WHERE id = ? AND deleted_at IS NULL",
            [&input.strand_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if strand.is_none() {
        return Err(err(&req.id, "not_found", "strand not found", None));
    }

    let dup: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE lrn = ?", [&input.lrn], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if dup.is_some() {
        return Err(err(
            &req.id,
            "conflict",
            "a record with this LRN already exists",
            Some(json!({ "lrn": input.lrn })),
        ));
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
            id, lrn, last_name, first_name, middle_name, suffix, gender,
            birth_date, email, phone, address, guardian_name, guardian_phone,
            last_school, school_year, grade_level, strand_id, section_id,
            status, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL,
                  'pending', strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        rusqlite::params![
            &student_id,
            &input.lrn,
            &input.last_name,
            &input.first_name,
            input.middle_name.as_deref(),
            input.suffix.as_deref(),
            &input.gender,
            input.birth_date.as_deref(),
            input.email.as_deref(),
            input.phone.as_deref(),
            input.address.as_deref(),
            input.guardian_name.as_deref(),
            input.guardian_phone.as_deref(),
            input.last_school.as_deref(),
            &input.school_year,
            input.grade_level,
            &input.strand_id,
        ],
    )
    .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    Ok(student_id)
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
    let school_year = match required_str(req, "schoolYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let input = match parse_student_input(req, school_year) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match insert_pending_student(conn, req, &input) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    log_activity(
        conn,
        Some(&user.id),
        "students.create",
        &format!("registered student {} ({})", input.lrn, input.last_name),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "id": student_id, "status": "pending" }))
}

const UPDATABLE_TEXT_FIELDS: [(&str, &str); 11] = [
    ("lastName", "last_name"),
    ("firstName", "first_name"),
    ("middleName", "middle_name"),
    ("suffix", "suffix"),
    ("birthDate", "birth_date"),
    ("email", "email"),
    ("phone", "phone"),
    ("address", "address"),
    ("guardianName", "guardian_name"),
    ("guardianPhone", "guardian_phone"),
    ("lastSchool", "last_school"),
];

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match require_role(conn, req, Role::Staff) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND deleted_at IS NULL",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    // Identity/contact edits only. LRN, strand, section, and status move
    // through their dedicated operations. Every field is validated before
    // the single UPDATE, so a rejected request changes nothing.
    let mut sets: Vec<String> = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    for (param, column) in UPDATABLE_TEXT_FIELDS {
        let Some(value) = req.params.get(param) else {
            continue;
        };
        let value = match value.as_str() {
            Some(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            None if value.is_null() => None,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{} must be a string or null", param),
                    None,
                )
            }
        };
        if (param == "lastName" || param == "firstName") && value.is_none() {
            return err(
                &req.id,
                "bad_params",
                format!("{} must not be empty", param),
                None,
            );
        }
        sets.push(format!("{} = ?", column));
        binds.push(match value {
            Some(s) => SqlValue::Text(s),
            None => SqlValue::Null,
        });
    }
    if let Some(gender) = req.params.get("gender") {
        if !gender.is_null() {
            let gender = match parse_gender(req, "gender") {
                Ok(g) => g,
                Err(resp) => return resp,
            };
            sets.push("gender = ?".into());
            binds.push(SqlValue::Text(gender));
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let sql = format!(
        "UPDATE students SET {}, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        sets.join(", ")
    );
    binds.push(SqlValue::Text(student_id.clone()));
    if let Err(e) = conn.execute(&sql, params_from_iter(binds)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "students.update",
        &format!("updated student {}", student_id),
        req.client_ip.as_deref(),
    );
    match load_student(conn, &student_id, false) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Deleting an enrolled student frees the seat; the section reference is
    // kept so restore can try to reclaim it.
    let updated = match conn.execute(
        "UPDATE students SET deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND deleted_at IS NULL",
        [&student_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    log_activity(
        conn,
        Some(&user.id),
        "students.delete",
        &format!("deleted student {}", student_id),
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row: Option<(String, Option<String>)> = match conn
        .query_row(
            "SELECT status, section_id FROM students
             WHERE id = ? AND deleted_at IS NOT NULL",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((status, section_id)) = row else {
        return err(&req.id, "not_found", "deleted student not found", None);
    };

    // Restore policy: an enrolled student only keeps their prior seat if the
    // section still exists and has room; otherwise the restore succeeds with
    // the section unassigned. The seat claim re-counts inside the UPDATE so a
    // concurrent enrollment cannot overbook.
    let mut section_unassigned = false;
    if let (Some(sec), "enrolled") = (section_id.as_deref(), status.as_str()) {
        let reclaimed = match conn.execute(
            "UPDATE students SET deleted_at = NULL,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?1 AND deleted_at IS NOT NULL
               AND EXISTS(SELECT 1 FROM sections WHERE id = ?2 AND deleted_at IS NULL)
               AND (SELECT COUNT(*) FROM students s2
                     WHERE s2.section_id = ?2 AND s2.status = 'enrolled'
                       AND s2.deleted_at IS NULL)
                   < (SELECT capacity FROM sections WHERE id = ?2)",
            (&student_id, sec),
        ) {
            Ok(n) => n,
            Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
        };
        if reclaimed == 0 {
            section_unassigned = true;
        }
    }

    if section_unassigned || section_id.is_none() || status != "enrolled" {
        let set_section = if section_unassigned {
            ", section_id = NULL"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE students SET deleted_at = NULL,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now'){}
             WHERE id = ? AND deleted_at IS NOT NULL",
            set_section
        );
        if let Err(e) = conn.execute(&sql, [&student_id]) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    let description = if section_unassigned {
        format!("restored student {} (section was full, unassigned)", student_id)
    } else {
        format!("restored student {}", student_id)
    };
    log_activity(
        conn,
        Some(&user.id),
        "students.restore",
        &description,
        req.client_ip.as_deref(),
    );
    ok(
        &req.id,
        json!({ "restored": true, "sectionUnassigned": section_unassigned }),
    )
}

fn transition_allowed(from: &str, to: &str) -> bool {
    matches!(
        (from, to),
        ("pending", "passed")
            | ("passed", "enrolled")
            | ("enrolled", "dropped")
            | ("enrolled", "graduate")
            | ("enrolled", "released")
    )
}

fn handle_transition(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user = match require_role(conn, req, Role::Staff) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let target = match required_str(req, "status") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    if !STATUSES.contains(&target.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("status must be one of: {}", STATUSES.join(", ")),
            None,
        );
    }

    let row: Option<(String, String, i64, String)> = match conn
        .query_row(
            "SELECT status, strand_id, grade_level, lrn FROM students
             WHERE id = ? AND deleted_at IS NULL",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((current, strand_id, grade_level, lrn)) = row else {
        return err(&req.id, "not_found", "student not found", None);
    };

    if !transition_allowed(&current, &target) {
        return err(
            &req.id,
            "invalid_transition",
            format!("cannot move from {} to {}", current, target),
            Some(json!({ "from": current, "to": target })),
        );
    }

    if target == "enrolled" {
        let section_id = match required_str(req, "sectionId") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let section: Option<(String, i64, i64)> = match conn
            .query_row(
                "SELECT strand_id, grade_level, capacity FROM sections
                 WHERE id = ? AND deleted_at IS NULL",
                [&section_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let Some((section_strand, section_grade, capacity)) = section else {
            return err(&req.id, "not_found", "section not found", None);
        };
        if section_strand != strand_id {
            return err(
                &req.id,
                "bad_params",
                "section belongs to a different strand",
                None,
            );
        }
        if section_grade != grade_level {
            return err(
                &req.id,
                "bad_params",
                "section is for a different grade level",
                None,
            );
        }

        // Seat claim and headcount check happen in one statement; SQLite
        // serializes writers, so the count cannot go stale under it and the
        // last seat cannot be double-booked.
        let claimed = match conn.execute(
            "UPDATE students SET status = 'enrolled', section_id = ?2,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?1 AND status = 'passed' AND deleted_at IS NULL
               AND (SELECT COUNT(*) FROM students s2
                     WHERE s2.section_id = ?2 AND s2.status = 'enrolled'
                       AND s2.deleted_at IS NULL)
                   < (SELECT capacity FROM sections WHERE id = ?2)",
            (&student_id, &section_id),
        ) {
            Ok(n) => n,
            Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
        };
        if claimed == 0 {
            return err(
                &req.id,
                "section_full",
                "section has no remaining seats",
                Some(json!({ "sectionId": section_id, "capacity": capacity })),
            );
        }

        log_activity(
            conn,
            Some(&user.id),
            "students.transition",
            &format!("enrolled {} into section {}", lrn, section_id),
            req.client_ip.as_deref(),
        );
        return ok(
            &req.id,
            json!({ "status": "enrolled", "sectionId": section_id, "corAvailable": true }),
        );
    }

    // Non-enrolling transitions keep the section on the record.
    let updated = match conn.execute(
        "UPDATE students SET status = ?2,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?1 AND status = ?3 AND deleted_at IS NULL",
        (&student_id, &target, &current),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(
            &req.id,
            "invalid_transition",
            "student status changed concurrently",
            None,
        );
    }

    log_activity(
        conn,
        Some(&user.id),
        "students.transition",
        &format!("moved {} from {} to {}", lrn, current, target),
        req.client_ip.as_deref(),
    );
    ok(&req.id, json!({ "status": target }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.get" => Some(handle_get(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        "students.restore" => Some(handle_restore(state, req)),
        "students.transition" => Some(handle_transition(state, req)),
        _ => None,
    }
}
