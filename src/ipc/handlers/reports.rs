use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_role, required_str, Role, STATUSES};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::json;

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_row(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Masterlist for one section: male block then female block, each sorted
/// alphabetically, the layout registrars expect on the printed form.
fn handle_masterlist(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let section: Option<(String, i64, i64, String, String)> = match conn
        .query_row(
            "SELECT sec.name, sec.grade_level, sec.capacity, str.code, str.description
             FROM sections sec JOIN strands str ON str.id = sec.strand_id
             WHERE sec.id = ? AND sec.deleted_at IS NULL",
            [&section_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((section_name, grade_level, capacity, strand_code, strand_description)) = section
    else {
        return err(&req.id, "not_found", "section not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT lrn, last_name, first_name, middle_name, suffix, gender
         FROM students
         WHERE section_id = ? AND status = 'enrolled' AND deleted_at IS NULL
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Vec<(serde_json::Value, String)> = match stmt
        .query_map([&section_id], |row| {
            let gender: String = row.get(5)?;
            let j = json!({
                "lrn": row.get::<_, String>(0)?,
                "lastName": row.get::<_, String>(1)?,
                "firstName": row.get::<_, String>(2)?,
                "middleName": row.get::<_, Option<String>>(3)?,
                "suffix": row.get::<_, Option<String>>(4)?,
            });
            Ok((j, gender))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut male: Vec<serde_json::Value> = Vec::new();
    let mut female: Vec<serde_json::Value> = Vec::new();
    for (j, gender) in rows {
        if gender == "male" {
            male.push(j);
        } else {
            female.push(j);
        }
    }

    let total_enrolled = male.len() + female.len();
    ok(
        &req.id,
        json!({
            "section": {
                "id": section_id,
                "name": section_name,
                "gradeLevel": grade_level,
                "capacity": capacity,
                "strandCode": strand_code,
                "strandDescription": strand_description
            },
            "male": male,
            "female": female,
            "totalEnrolled": total_enrolled
        }),
    )
}

/// Dashboard aggregates: per-status and per-strand counts for a school year.
fn handle_enrollment_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }
    let school_year = match required_str(req, "schoolYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut by_status = serde_json::Map::new();
    for status in STATUSES {
        let count: i64 = match conn.query_row(
            "SELECT COUNT(*) FROM students
             WHERE school_year = ? AND status = ? AND deleted_at IS NULL",
            [&school_year, status],
            |r| r.get(0),
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        by_status.insert(status.to_string(), json!(count));
    }

    let mut stmt = match conn.prepare(
        "SELECT str.code, st.grade_level, COUNT(*)
         FROM students st JOIN strands str ON str.id = st.strand_id
         WHERE st.school_year = ? AND st.status = 'enrolled' AND st.deleted_at IS NULL
         GROUP BY str.code, st.grade_level
         ORDER BY str.code, st.grade_level",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let by_strand = stmt
        .query_map([&school_year], |row| {
            Ok(json!({
                "strandCode": row.get::<_, String>(0)?,
                "gradeLevel": row.get::<_, i64>(1)?,
                "enrolled": row.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match by_strand {
        Ok(by_strand) => ok(
            &req.id,
            json!({
                "schoolYear": school_year,
                "byStatus": by_status,
                "byStrand": by_strand
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }
    let school_year = match required_str(req, "schoolYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match req.params.get("status").and_then(|v| v.as_str()) {
        Some(s) => {
            let s = s.trim().to_ascii_lowercase();
            if !STATUSES.contains(&s.as_str()) {
                return err(
                    &req.id,
                    "bad_params",
                    format!("status must be one of: {}", STATUSES.join(", ")),
                    None,
                );
            }
            Some(s)
        }
        None => None,
    };

    let mut sql = String::from(
        "SELECT st.lrn, st.last_name, st.first_name, st.middle_name, st.gender,
                st.grade_level, str.code, COALESCE(sec.name, ''), st.status
         FROM students st
         JOIN strands str ON str.id = st.strand_id
         LEFT JOIN sections sec ON sec.id = st.section_id
         WHERE st.school_year = ? AND st.deleted_at IS NULL",
    );
    let mut binds: Vec<SqlValue> = vec![SqlValue::Text(school_year.clone())];
    if let Some(ref status) = status {
        sql.push_str(" AND st.status = ?");
        binds.push(SqlValue::Text(status.clone()));
    }
    sql.push_str(" ORDER BY st.last_name, st.first_name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Vec<[String; 9]> = match stmt
        .query_map(params_from_iter(binds), |row| {
            Ok([
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?.to_string(),
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ])
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut csv = String::new();
    csv.push_str(&csv_row(&[
        "LRN",
        "Last Name",
        "First Name",
        "Middle Name",
        "Gender",
        "Grade Level",
        "Strand",
        "Section",
        "Status",
    ]));
    csv.push('\n');
    for row in &rows {
        let fields: Vec<&str> = row.iter().map(String::as_str).collect();
        csv.push_str(&csv_row(&fields));
        csv.push('\n');
    }

    let filename = match status {
        Some(ref status) => format!("students-{}-{}.csv", school_year.replace('/', "-"), status),
        None => format!("students-{}.csv", school_year.replace('/', "-")),
    };
    ok(
        &req.id,
        json!({ "filename": filename, "rowCount": rows.len(), "csv": csv }),
    )
}

fn subject_rows(
    conn: &Connection,
    strand_id: &str,
    grade_level: i64,
    semester: i64,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT code, description FROM subjects
         WHERE (strand_id = ? OR strand_id IS NULL)
           AND grade_level = ? AND semester = ? AND deleted_at IS NULL
         ORDER BY code",
    )?;
    let subjects = stmt
        .query_map(
            rusqlite::params![strand_id, grade_level, semester],
            |row| {
                Ok(json!({
                    "code": row.get::<_, String>(0)?,
                    "description": row.get::<_, String>(1)?,
                }))
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(subjects)
}

/// Certificate of Registration document model. The shell renders this to
/// PDF; the daemon only assembles the data.
fn handle_cor(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let registrar_name = match required_str(req, "registrarName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let settings = match db::settings_load(conn) {
        Ok(Some(v)) => v,
        Ok(None) => {
            return err(
                &req.id,
                "bad_params",
                "enrollment settings are not configured",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let row: Option<(String, String, String, Option<String>, Option<String>, i64, String, String, String, Option<String>, String)> =
        match conn
            .query_row(
                "SELECT st.lrn, st.last_name, st.first_name, st.middle_name, st.suffix,
                        st.grade_level, st.strand_id, str.code, str.description,
                        sec.name, st.status
                 FROM students st
                 JOIN strands str ON str.id = st.strand_id
                 LEFT JOIN sections sec ON sec.id = st.section_id
                 WHERE st.id = ? AND st.deleted_at IS NULL",
                [&student_id],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                        r.get(7)?,
                        r.get(8)?,
                        r.get(9)?,
                        r.get(10)?,
                    ))
                },
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let Some((
        lrn,
        last_name,
        first_name,
        middle_name,
        suffix,
        grade_level,
        strand_id,
        strand_code,
        strand_description,
        section_name,
        status,
    )) = row
    else {
        return err(&req.id, "not_found", "student not found", None);
    };
    if status != "enrolled" {
        return err(
            &req.id,
            "bad_params",
            "certificate of registration is only issued for enrolled students",
            Some(json!({ "status": status })),
        );
    }

    let subjects = match subject_rows(conn, &strand_id, grade_level, settings.semester) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "document": {
                "title": "Certificate of Registration",
                "schoolYear": settings.school_year,
                "semester": settings.semester,
                "student": {
                    "lrn": lrn,
                    "lastName": last_name,
                    "firstName": first_name,
                    "middleName": middle_name,
                    "suffix": suffix,
                    "gradeLevel": grade_level,
                    "strandCode": strand_code,
                    "strandDescription": strand_description,
                    "sectionName": section_name
                },
                "subjects": subjects,
                "registrarName": registrar_name
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.masterlist" => Some(handle_masterlist(state, req)),
        "reports.enrollmentSummary" => Some(handle_enrollment_summary(state, req)),
        "reports.exportCsv" => Some(handle_export_csv(state, req)),
        "reports.cor" => Some(handle_cor(state, req)),
        _ => None,
    }
}
