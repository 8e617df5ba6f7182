mod test_support;

use serde_json::json;
use test_support::{
    error_code, login_admin, open_workspace, request_as, request_ok, request_ok_as,
    seed_strand_and_section, spawn_sidecar, temp_dir,
};

#[test]
fn export_then_import_restores_the_snapshot() {
    let workspace = temp_dir("enrolld-backup");
    let out_dir = temp_dir("enrolld-backup-out");
    let bundle = out_dir.join("snapshot.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);
    let _ = seed_strand_and_section(&mut stdin, &mut reader, &admin, 40);

    let exported = request_ok_as(
        &mut stdin,
        &mut reader,
        "export",
        "backup.export",
        Some(&admin),
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("enroll-workspace-v1")
    );
    assert!(bundle.is_file());

    // Mutate after the snapshot, then restore.
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "mutate",
        "strands.create",
        Some(&admin),
        json!({ "code": "GAS", "description": "General Academic Strand" }),
    );
    let before = request_ok_as(&mut stdin, &mut reader, "before", "strands.list", Some(&admin), json!({}));
    assert_eq!(
        before.get("strands").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    let imported = request_ok_as(
        &mut stdin,
        &mut reader,
        "import",
        "backup.import",
        Some(&admin),
        json!({ "bundlePath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        imported.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("enroll-workspace-v1")
    );

    // Sessions live inside the database, so the snapshot's sessions are
    // back: the pre-snapshot admin token still works.
    let after = request_ok_as(&mut stdin, &mut reader, "after", "strands.list", Some(&admin), json!({}));
    assert_eq!(
        after.get("strands").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
}

#[test]
fn backup_is_admin_only_and_rejects_bad_bundles() {
    let workspace = temp_dir("enrolld-backup-guard");
    let out_dir = temp_dir("enrolld-backup-guard-out");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);

    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "mk-staff",
        "users.create",
        Some(&admin),
        json!({
            "username": "clerk",
            "password": "clerk-pass-1",
            "displayName": "Clerk",
            "role": "staff"
        }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "staff-login",
        "auth.login",
        json!({ "username": "clerk", "password": "clerk-pass-1" }),
    );
    let staff = login.get("token").and_then(|v| v.as_str()).expect("token");

    let denied = request_as(
        &mut stdin,
        &mut reader,
        "denied",
        "backup.export",
        Some(staff),
        json!({ "outPath": out_dir.join("x.zip").to_string_lossy() }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    // Not a zip at all.
    let junk = out_dir.join("junk.zip");
    std::fs::write(&junk, b"not a bundle").expect("write junk");
    let failed = request_as(
        &mut stdin,
        &mut reader,
        "junk",
        "backup.import",
        Some(&admin),
        json!({ "bundlePath": junk.to_string_lossy() }),
    );
    assert_eq!(error_code(&failed), "restore_failed");

    // The daemon stays usable after a failed restore.
    let _ = request_ok_as(&mut stdin, &mut reader, "alive", "strands.list", Some(&admin), json!({}));
}
