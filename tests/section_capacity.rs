mod test_support;

use serde_json::json;
use test_support::{
    error_code, login_admin, open_workspace, request_as, request_ok_as,
    seed_passed_student, seed_strand_and_section, spawn_sidecar, temp_dir,
};

#[test]
fn last_seat_cannot_be_overbooked() {
    let workspace = temp_dir("enrolld-capacity");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);
    let (strand_id, section_id) = seed_strand_and_section(&mut stdin, &mut reader, &admin, 2);

    let a = seed_passed_student(&mut stdin, &mut reader, &admin, "300000000001", "Abad", "male", &strand_id);
    let b = seed_passed_student(&mut stdin, &mut reader, &admin, "300000000002", "Bello", "female", &strand_id);
    let c = seed_passed_student(&mut stdin, &mut reader, &admin, "300000000003", "Campo", "male", &strand_id);

    for (i, student) in [&a, &b].iter().enumerate() {
        let _ = request_ok_as(
            &mut stdin,
            &mut reader,
            &format!("enroll-{}", i),
            "students.transition",
            Some(&admin),
            json!({ "studentId": student, "status": "enrolled", "sectionId": section_id }),
        );
    }

    let full = request_as(
        &mut stdin,
        &mut reader,
        "overflow",
        "students.transition",
        Some(&admin),
        json!({ "studentId": c, "status": "enrolled", "sectionId": section_id }),
    );
    assert_eq!(error_code(&full), "section_full");

    // The rejected student is still waiting for a seat.
    let fetched = request_ok_as(
        &mut stdin,
        &mut reader,
        "check",
        "students.get",
        Some(&admin),
        json!({ "studentId": c }),
    );
    let student = fetched.get("student").expect("student");
    assert_eq!(student.get("status").and_then(|v| v.as_str()), Some("passed"));
    assert!(student.get("sectionId").map(|v| v.is_null()).unwrap_or(false));

    let sections = request_ok_as(
        &mut stdin,
        &mut reader,
        "list",
        "sections.list",
        Some(&admin),
        json!({}),
    );
    let section = sections
        .get("sections")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .expect("section");
    assert_eq!(section.get("enrolledCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(section.get("capacity").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn capacity_cannot_shrink_below_headcount_and_frees_on_drop() {
    let workspace = temp_dir("enrolld-capacity-shrink");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);
    let (strand_id, section_id) = seed_strand_and_section(&mut stdin, &mut reader, &admin, 2);

    let a = seed_passed_student(&mut stdin, &mut reader, &admin, "300000000011", "Diaz", "male", &strand_id);
    let b = seed_passed_student(&mut stdin, &mut reader, &admin, "300000000012", "Enrile", "female", &strand_id);
    for (i, student) in [&a, &b].iter().enumerate() {
        let _ = request_ok_as(
            &mut stdin,
            &mut reader,
            &format!("enroll-{}", i),
            "students.transition",
            Some(&admin),
            json!({ "studentId": student, "status": "enrolled", "sectionId": section_id }),
        );
    }

    let shrink = request_as(
        &mut stdin,
        &mut reader,
        "shrink",
        "sections.update",
        Some(&admin),
        json!({ "sectionId": section_id, "capacity": 1 }),
    );
    assert_eq!(error_code(&shrink), "conflict");

    // Dropping a student frees the seat for the next enrollee.
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "drop",
        "students.transition",
        Some(&admin),
        json!({ "studentId": a, "status": "dropped" }),
    );
    let c = seed_passed_student(&mut stdin, &mut reader, &admin, "300000000013", "Flores", "male", &strand_id);
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "reuse",
        "students.transition",
        Some(&admin),
        json!({ "studentId": c, "status": "enrolled", "sectionId": section_id }),
    );
}
