mod test_support;

use serde_json::json;
use test_support::{
    error_code, login_admin, open_workspace, request, request_as, request_ok,
    request_ok_as, spawn_sidecar, temp_dir,
};

#[test]
fn bootstrap_admin_can_login_and_logout() {
    let workspace = temp_dir("enrolld-auth-bootstrap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let bad = request(
        &mut stdin,
        &mut reader,
        "1",
        "auth.login",
        json!({ "username": "admin", "password": "wrong" }),
    );
    assert_eq!(error_code(&bad), "unauthorized");

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "username": "admin", "password": "admin" }),
    );
    let token = login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();
    assert_eq!(
        login
            .get("user")
            .and_then(|u| u.get("role"))
            .and_then(|r| r.as_str()),
        Some("admin")
    );

    let me = request_ok_as(&mut stdin, &mut reader, "3", "auth.me", Some(&token), json!({}));
    assert_eq!(me.get("username").and_then(|v| v.as_str()), Some("admin"));

    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "4",
        "auth.logout",
        Some(&token),
        json!({}),
    );
    let me = request_as(&mut stdin, &mut reader, "5", "auth.me", Some(&token), json!({}));
    assert_eq!(error_code(&me), "unauthorized");
}

#[test]
fn staff_accounts_are_role_limited_and_deactivation_revokes_sessions() {
    let workspace = temp_dir("enrolld-auth-staff");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);

    let created = request_ok_as(
        &mut stdin,
        &mut reader,
        "1",
        "users.create",
        Some(&admin),
        json!({
            "username": "registrar",
            "password": "registrar-pass",
            "displayName": "Registrar",
            "role": "staff"
        }),
    );
    let staff_id = created
        .get("id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "username": "registrar", "password": "registrar-pass" }),
    );
    let staff_token = login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();

    // Staff cannot manage accounts.
    let denied = request_as(
        &mut stdin,
        &mut reader,
        "3",
        "users.list",
        Some(&staff_token),
        json!({}),
    );
    assert_eq!(error_code(&denied), "forbidden");
    assert_eq!(
        denied
            .get("error")
            .and_then(|e| e.get("httpStatus"))
            .and_then(|v| v.as_i64()),
        Some(403)
    );

    // Deactivation kills the live session and blocks new logins.
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "4",
        "users.setActive",
        Some(&admin),
        json!({ "userId": staff_id, "active": false }),
    );
    let revoked = request_as(
        &mut stdin,
        &mut reader,
        "5",
        "auth.me",
        Some(&staff_token),
        json!({}),
    );
    assert_eq!(error_code(&revoked), "unauthorized");
    let relogin = request(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "username": "registrar", "password": "registrar-pass" }),
    );
    assert_eq!(error_code(&relogin), "unauthorized");
}

#[test]
fn login_sweeps_expired_sessions() {
    let workspace = temp_dir("enrolld-auth-sweep");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let _ = login_admin(&mut stdin, &mut reader);

    // Plant an already-expired session directly in the workspace database.
    let conn =
        rusqlite::Connection::open(workspace.join("enroll.sqlite3")).expect("open workspace db");
    let admin_id: String = conn
        .query_row("SELECT id FROM users WHERE username = 'admin'", [], |r| {
            r.get(0)
        })
        .expect("admin id");
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at)
         VALUES('stale-token', ?,
                strftime('%Y-%m-%dT%H:%M:%SZ','now','-13 hours'),
                strftime('%Y-%m-%dT%H:%M:%SZ','now','-1 hours'))",
        [&admin_id],
    )
    .expect("insert stale session");

    let rejected = request_as(
        &mut stdin,
        &mut reader,
        "stale",
        "auth.me",
        Some("stale-token"),
        json!({}),
    );
    assert_eq!(error_code(&rejected), "unauthorized");

    // The next login removes the expired row instead of leaving it behind.
    let _ = login_admin(&mut stdin, &mut reader);
    let remaining: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sessions WHERE token = 'stale-token'",
            [],
            |r| r.get(0),
        )
        .expect("count stale sessions");
    assert_eq!(remaining, 0);
}

#[test]
fn admin_cannot_demote_or_deactivate_themselves() {
    let workspace = temp_dir("enrolld-auth-self");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);

    let users = request_ok_as(&mut stdin, &mut reader, "1", "users.list", Some(&admin), json!({}));
    let admin_id = users
        .get("users")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .expect("admin id")
        .to_string();

    let demote = request_as(
        &mut stdin,
        &mut reader,
        "2",
        "users.update",
        Some(&admin),
        json!({ "userId": admin_id, "role": "staff" }),
    );
    assert_eq!(error_code(&demote), "bad_params");

    let deactivate = request_as(
        &mut stdin,
        &mut reader,
        "3",
        "users.setActive",
        Some(&admin),
        json!({ "userId": admin_id, "active": false }),
    );
    assert_eq!(error_code(&deactivate), "bad_params");
}
