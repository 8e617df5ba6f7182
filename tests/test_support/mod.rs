#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_enrolld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn enrolld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    request_as(stdin, reader, id, method, None, params)
}

pub fn request_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    token: Option<&str>,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(token) = token {
        payload["token"] = json!(token);
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    request_ok_as(stdin, reader, id, method, None, params)
}

pub fn request_ok_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    token: Option<&str>,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_as(stdin, reader, id, method, token, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error response: {}",
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
}

pub fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let result = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        result.get("bootstrapAdminCreated").and_then(|v| v.as_bool()),
        Some(true)
    );
}

/// The bootstrap account seeded into an empty workspace.
pub fn login_admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let result = request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "username": "admin", "password": "admin" }),
    );
    result
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string()
}

pub fn student_params(
    lrn: &str,
    last_name: &str,
    first_name: &str,
    gender: &str,
    strand_id: &str,
    school_year: &str,
) -> serde_json::Value {
    json!({
        "lrn": lrn,
        "lastName": last_name,
        "firstName": first_name,
        "gender": gender,
        "strandId": strand_id,
        "schoolYear": school_year,
        "gradeLevel": 11
    })
}

/// Strand + one section with the given capacity, returning (strand_id, section_id).
pub fn seed_strand_and_section(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    token: &str,
    capacity: i64,
) -> (String, String) {
    let strand = request_ok_as(
        stdin,
        reader,
        "seed-strand",
        "strands.create",
        Some(token),
        json!({ "code": "STEM", "description": "Science, Technology, Engineering and Mathematics" }),
    );
    let strand_id = strand.get("id").and_then(|v| v.as_str()).expect("strand id").to_string();
    let section = request_ok_as(
        stdin,
        reader,
        "seed-section",
        "sections.create",
        Some(token),
        json!({
            "name": "Newton",
            "strandId": strand_id,
            "gradeLevel": 11,
            "capacity": capacity
        }),
    );
    let section_id = section.get("id").and_then(|v| v.as_str()).expect("section id").to_string();
    (strand_id, section_id)
}

/// Create a pending student via staff, then walk them to `passed`.
pub fn seed_passed_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    token: &str,
    lrn: &str,
    last_name: &str,
    gender: &str,
    strand_id: &str,
) -> String {
    let created = request_ok_as(
        stdin,
        reader,
        &format!("seed-student-{}", lrn),
        "students.create",
        Some(token),
        student_params(lrn, last_name, "Test", gender, strand_id, "2025-2026"),
    );
    let student_id = created.get("id").and_then(|v| v.as_str()).expect("id").to_string();
    let _ = request_ok_as(
        stdin,
        reader,
        &format!("seed-pass-{}", lrn),
        "students.transition",
        Some(token),
        json!({ "studentId": student_id, "status": "passed" }),
    );
    student_id
}
