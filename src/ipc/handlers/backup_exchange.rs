use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, log_activity, require_role, required_str, Role};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let admin = match require_role(conn, req, Role::Admin) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => {
            log_activity(
                conn,
                Some(&admin.id),
                "backup.export",
                &format!("exported workspace bundle to {}", out_path.to_string_lossy()),
                req.client_ip.as_deref(),
            );
            ok(
                &req.id,
                json!({
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "outPath": out_path.to_string_lossy()
                }),
            )
        }
        Err(e) => err(&req.id, "backup_failed", e.to_string(), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (bundle_path, admin_id) = {
        let conn = match db_conn(state, req) {
            Ok(c) => c,
            Err(resp) => return resp,
        };
        let admin = match require_role(conn, req, Role::Admin) {
            Ok(u) => u,
            Err(resp) => return resp,
        };
        let path = match required_str(req, "bundlePath") {
            Ok(v) => PathBuf::from(v),
            Err(resp) => return resp,
        };
        (path, admin.id)
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Drop the open connection before overwriting the database file.
    state.db = None;
    let summary = match backup::import_workspace_bundle(&bundle_path, &workspace) {
        Ok(v) => v,
        Err(e) => {
            // Reopen whatever is on disk so the daemon stays usable.
            state.db = db::open_db(&workspace).ok();
            return err(&req.id, "restore_failed", e.to_string(), None);
        }
    };
    match db::open_db(&workspace) {
        Ok(conn) => {
            log_activity(
                &conn,
                Some(&admin_id),
                "backup.import",
                &format!("restored workspace from {}", bundle_path.to_string_lossy()),
                req.client_ip.as_deref(),
            );
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "bundleFormatDetected": summary.bundle_format_detected }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
