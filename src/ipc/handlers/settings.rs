use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, log_activity, optional_bool, optional_i64, optional_str, require_role, Role,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;

fn settings_json(settings: &db::EnrollmentSettings) -> serde_json::Value {
    json!({
        "schoolYear": settings.school_year,
        "semester": settings.semester,
        "startDate": settings.start_date,
        "endDate": settings.end_date,
        "maintenanceMode": settings.maintenance_mode,
    })
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }
    match db::settings_load(conn) {
        Ok(Some(settings)) => ok(&req.id, json!({ "settings": settings_json(&settings) })),
        Ok(None) => ok(&req.id, json!({ "settings": serde_json::Value::Null })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_date(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    let Some(raw) = optional_str(req, key) else {
        return Ok(None);
    };
    if NaiveDate::parse_from_str(&raw, "%Y-%m-%d").is_err() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a YYYY-MM-DD date", key),
            Some(json!({ key: raw })),
        ));
    }
    Ok(Some(raw))
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

    let current = match db::settings_load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let school_year = match optional_str(req, "schoolYear") {
        Some(v) => v,
        None => match current.as_ref() {
            Some(c) => c.school_year.clone(),
            None => return err(&req.id, "bad_params", "missing schoolYear", None),
        },
    };
    let semester = match optional_i64(req, "semester") {
        Some(v) if v == 1 || v == 2 => v,
        Some(_) => return err(&req.id, "bad_params", "semester must be 1 or 2", None),
        None => match current.as_ref() {
            Some(c) => c.semester,
            None => return err(&req.id, "bad_params", "missing semester", None),
        },
    };
    let start_date = match parse_date(req, "startDate") {
        Ok(Some(v)) => Some(v),
        Ok(None) => current.as_ref().and_then(|c| c.start_date.clone()),
        Err(resp) => return resp,
    };
    let end_date = match parse_date(req, "endDate") {
        Ok(Some(v)) => Some(v),
        Ok(None) => current.as_ref().and_then(|c| c.end_date.clone()),
        Err(resp) => return resp,
    };
    if let (Some(s), Some(e)) = (start_date.as_deref(), end_date.as_deref()) {
        if s > e {
            return err(
                &req.id,
                "bad_params",
                "startDate must not be after endDate",
                None,
            );
        }
    }
    let maintenance_mode = optional_bool(req, "maintenanceMode")
        .unwrap_or_else(|| current.as_ref().map(|c| c.maintenance_mode).unwrap_or(false));

    if let Err(e) = conn.execute(
        "INSERT INTO enrollment_settings(
            id, school_year, semester, start_date, end_date, maintenance_mode, updated_at
         ) VALUES(1, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(id) DO UPDATE SET
            school_year = excluded.school_year,
            semester = excluded.semester,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            maintenance_mode = excluded.maintenance_mode,
            updated_at = excluded.updated_at",
        (
            &school_year,
            semester,
            start_date.as_deref(),
            end_date.as_deref(),
            maintenance_mode as i64,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    log_activity(
        conn,
        Some(&admin.id),
        "settings.update",
        &format!(
            "settings: SY {} sem {} maintenance {}",
            school_year,
            semester,
            if maintenance_mode { "on" } else { "off" }
        ),
        req.client_ip.as_deref(),
    );
    ok(
        &req.id,
        json!({
            "settings": {
                "schoolYear": school_year,
                "semester": semester,
                "startDate": start_date,
                "endDate": end_date,
                "maintenanceMode": maintenance_mode
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_get(state, req)),
        "settings.update" => Some(handle_update(state, req)),
        _ => None,
    }
}
