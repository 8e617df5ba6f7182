use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_i64, optional_str, require_role, Role};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value as SqlValue};
use serde_json::json;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(conn, req, Role::Staff) {
        return resp;
    }

    let limit = optional_i64(req, "limit")
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT);
    let action = optional_str(req, "action");

    let mut sql = String::from(
        "SELECT al.id, al.user_id, u.username, al.action, al.description,
                al.ip_address, al.created_at
         FROM activity_logs al LEFT JOIN users u ON u.id = al.user_id",
    );
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(action) = action {
        sql.push_str(" WHERE al.action LIKE ?");
        binds.push(SqlValue::Text(format!("{}%", action)));
    }
    sql.push_str(" ORDER BY al.created_at DESC, al.id DESC LIMIT ?");
    binds.push(SqlValue::Integer(limit));

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "userId": row.get::<_, Option<String>>(1)?,
                "username": row.get::<_, Option<String>>(2)?,
                "action": row.get::<_, String>(3)?,
                "description": row.get::<_, String>(4)?,
                "ipAddress": row.get::<_, Option<String>>(5)?,
                "createdAt": row.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(logs) => ok(&req.id, json!({ "logs": logs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "logs.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
