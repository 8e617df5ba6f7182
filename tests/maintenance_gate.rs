mod test_support;

use serde_json::json;
use test_support::{
    error_code, login_admin, open_workspace, request, request_as, request_ok,
    request_ok_as, spawn_sidecar, temp_dir,
};

fn create_staff_token(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    admin: &str,
) -> String {
    let _ = request_ok_as(
        stdin,
        reader,
        "mk-staff",
        "users.create",
        Some(admin),
        json!({
            "username": "clerk",
            "password": "clerk-pass-1",
            "displayName": "Clerk",
            "role": "staff"
        }),
    );
    let login = request_ok(
        stdin,
        reader,
        "staff-login",
        "auth.login",
        json!({ "username": "clerk", "password": "clerk-pass-1" }),
    );
    login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string()
}

#[test]
fn gate_blocks_non_admins_while_maintenance_is_on() {
    let workspace = temp_dir("enrolld-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);
    let staff = create_staff_token(&mut stdin, &mut reader, &admin);

    // No settings row yet: the gate is open.
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "1",
        "strands.list",
        Some(&staff),
        json!({}),
    );

    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "2",
        "settings.update",
        Some(&admin),
        json!({
            "schoolYear": "2025-2026",
            "semester": 1,
            "maintenanceMode": true
        }),
    );

    // Staff and anonymous callers get the 503 envelope.
    let blocked = request_as(
        &mut stdin,
        &mut reader,
        "3",
        "strands.list",
        Some(&staff),
        json!({}),
    );
    assert_eq!(error_code(&blocked), "maintenance_mode");
    let error = blocked.get("error").expect("error");
    assert_eq!(
        error.get("httpStatus").and_then(|v| v.as_i64()),
        Some(503)
    );
    assert!(error
        .get("details")
        .and_then(|d| d.get("retryAfterSeconds"))
        .and_then(|v| v.as_i64())
        .is_some());

    let anon = request(
        &mut stdin,
        &mut reader,
        "4",
        "enrollment.lookup",
        json!({ "lrn": "123456789012" }),
    );
    assert_eq!(error_code(&anon), "maintenance_mode");

    // Admins pass, and login stays reachable so the flag can be cleared.
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "5",
        "strands.list",
        Some(&admin),
        json!({}),
    );
    let relogin = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "username": "admin", "password": "admin" }),
    );
    assert!(relogin.get("token").is_some());

    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "7",
        "settings.update",
        Some(&admin),
        json!({ "maintenanceMode": false }),
    );
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "8",
        "strands.list",
        Some(&staff),
        json!({}),
    );
}
