use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, log_activity, parse_lrn};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;

use super::students;

/// Public submissions are only accepted while today falls inside the
/// configured window. No settings row means enrollment has never been opened.
fn window_open(settings: &db::EnrollmentSettings) -> bool {
    let (Some(start), Some(end)) = (settings.start_date.as_deref(), settings.end_date.as_deref())
    else {
        return false;
    };
    let (Ok(start), Ok(end)) = (
        NaiveDate::parse_from_str(start, "%Y-%m-%d"),
        NaiveDate::parse_from_str(end, "%Y-%m-%d"),
    ) else {
        return false;
    };
    let today = chrono::Utc::now().date_naive();
    start <= today && today <= end
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let settings = match db::settings_load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(settings) = settings.filter(window_open) else {
        return err(
            &req.id,
            "enrollment_closed",
            "enrollment is not currently open",
            None,
        );
    };

    let input = match students::parse_student_input(req, settings.school_year.clone()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match students::insert_pending_student(conn, req, &input) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    log_activity(
        conn,
        None,
        "enrollment.submit",
        &format!("online application from LRN {}", input.lrn),
        req.client_ip.as_deref(),
    );
    ok(
        &req.id,
        json!({
            "id": student_id,
            "status": "pending",
            "schoolYear": settings.school_year,
            "semester": settings.semester
        }),
    )
}

/// Status lookup by LRN. Deliberately returns only what the applicant
/// already knows plus the status snapshot; no contact or guardian fields.
fn handle_lookup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let lrn = match parse_lrn(req, "lrn") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row = match conn
        .query_row(
            "SELECT st.last_name, st.first_name, st.status, st.school_year,
                    st.grade_level, str.code, sec.name
             FROM students st
             JOIN strands str ON str.id = st.strand_id
             LEFT JOIN sections sec ON sec.id = st.section_id
             WHERE st.lrn = ? AND st.deleted_at IS NULL",
            [&lrn],
            |r| {
                Ok(json!({
                    "lrn": lrn,
                    "lastName": r.get::<_, String>(0)?,
                    "firstName": r.get::<_, String>(1)?,
                    "status": r.get::<_, String>(2)?,
                    "schoolYear": r.get::<_, String>(3)?,
                    "gradeLevel": r.get::<_, i64>(4)?,
                    "strandCode": r.get::<_, String>(5)?,
                    "sectionName": r.get::<_, Option<String>>(6)?,
                }))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match row {
        Some(snapshot) => ok(&req.id, json!({ "application": snapshot })),
        None => err(&req.id, "not_found", "no application found for this LRN", None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollment.submit" => Some(handle_submit(state, req)),
        "enrollment.lookup" => Some(handle_lookup(state, req)),
        _ => None,
    }
}
