use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub const STATUSES: [&str; 6] = [
    "pending",
    "passed",
    "enrolled",
    "dropped",
    "graduate",
    "released",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Staff,
    Admin,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

pub fn db_conn<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let s = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if s.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(s)
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

pub fn optional_bool(req: &Request, key: &str) -> Option<bool> {
    req.params.get(key).and_then(|v| v.as_bool())
}

/// Senior-High grade levels only.
pub fn parse_grade_level(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    let grade = required_i64(req, key)?;
    if grade != 11 && grade != 12 {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be 11 or 12", key),
            Some(json!({ key: grade })),
        ));
    }
    Ok(grade)
}

pub fn parse_semester(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    let sem = required_i64(req, key)?;
    if sem != 1 && sem != 2 {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be 1 or 2", key),
            Some(json!({ key: sem })),
        ));
    }
    Ok(sem)
}

/// LRN is a 12-digit national learner identifier.
pub fn parse_lrn(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let lrn = required_str(req, key)?;
    if lrn.len() != 12 || !lrn.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err(
            &req.id,
            "bad_params",
            "lrn must be exactly 12 digits",
            Some(json!({ key: lrn })),
        ));
    }
    Ok(lrn)
}

pub fn parse_gender(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let g = required_str(req, key)?.to_ascii_lowercase();
    if g != "male" && g != "female" {
        return Err(err(
            &req.id,
            "bad_params",
            "gender must be one of: male, female",
            None,
        ));
    }
    Ok(g)
}

/// Resolve the request token to an active user. Expired sessions are treated
/// the same as unknown tokens.
pub fn authenticate(conn: &Connection, req: &Request) -> Result<AuthUser, serde_json::Value> {
    let Some(token) = req.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(err(&req.id, "unauthorized", "missing token", None));
    };

    let row = conn
        .query_row(
            "SELECT u.id, u.username, u.display_name, u.role, u.active
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?
               AND s.expires_at > strftime('%Y-%m-%dT%H:%M:%SZ','now')
               AND u.deleted_at IS NULL",
            [token],
            |r| {
                Ok((
                    AuthUser {
                        id: r.get(0)?,
                        username: r.get(1)?,
                        display_name: r.get(2)?,
                        role: r.get(3)?,
                    },
                    r.get::<_, i64>(4)? != 0,
                ))
            },
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    match row {
        Some((user, true)) => Ok(user),
        Some((_, false)) => Err(err(&req.id, "unauthorized", "account is inactive", None)),
        None => Err(err(&req.id, "unauthorized", "invalid or expired token", None)),
    }
}

pub fn require_role(
    conn: &Connection,
    req: &Request,
    role: Role,
) -> Result<AuthUser, serde_json::Value> {
    let user = authenticate(conn, req)?;
    if role == Role::Admin && user.role != "admin" {
        return Err(err(&req.id, "forbidden", "admin role required", None));
    }
    Ok(user)
}

/// Append an audit entry. Best-effort: the audited action must not fail
/// because the log write did.
pub fn log_activity(
    conn: &Connection,
    user_id: Option<&str>,
    action: &str,
    description: &str,
    client_ip: Option<&str>,
) {
    let _ = conn.execute(
        "INSERT INTO activity_logs(id, user_id, action, description, ip_address, created_at)
         VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            Uuid::new_v4().to_string(),
            user_id,
            action,
            description,
            client_ip,
        ),
    );
}
