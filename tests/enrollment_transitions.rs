mod test_support;

use serde_json::json;
use test_support::{
    error_code, login_admin, open_workspace, request_as, request_ok_as,
    seed_strand_and_section, spawn_sidecar, student_params, temp_dir,
};

#[test]
fn lifecycle_walks_pending_passed_enrolled_graduate() {
    let workspace = temp_dir("enrolld-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);
    let (strand_id, section_id) = seed_strand_and_section(&mut stdin, &mut reader, &admin, 40);

    let created = request_ok_as(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        Some(&admin),
        student_params("200000000001", "Santos", "Ben", "male", &strand_id, "2025-2026"),
    );
    let student_id = created
        .get("id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();

    // Skipping the interview step is not allowed.
    let skip = request_as(
        &mut stdin,
        &mut reader,
        "2",
        "students.transition",
        Some(&admin),
        json!({ "studentId": student_id, "status": "enrolled", "sectionId": section_id }),
    );
    assert_eq!(error_code(&skip), "invalid_transition");

    let passed = request_ok_as(
        &mut stdin,
        &mut reader,
        "3",
        "students.transition",
        Some(&admin),
        json!({ "studentId": student_id, "status": "passed" }),
    );
    assert_eq!(passed.get("status").and_then(|v| v.as_str()), Some("passed"));

    let enrolled = request_ok_as(
        &mut stdin,
        &mut reader,
        "4",
        "students.transition",
        Some(&admin),
        json!({ "studentId": student_id, "status": "enrolled", "sectionId": section_id }),
    );
    assert_eq!(
        enrolled.get("status").and_then(|v| v.as_str()),
        Some("enrolled")
    );
    assert_eq!(
        enrolled.get("corAvailable").and_then(|v| v.as_bool()),
        Some(true)
    );

    // Backwards moves are rejected.
    let backwards = request_as(
        &mut stdin,
        &mut reader,
        "5",
        "students.transition",
        Some(&admin),
        json!({ "studentId": student_id, "status": "pending" }),
    );
    assert_eq!(error_code(&backwards), "invalid_transition");

    let graduated = request_ok_as(
        &mut stdin,
        &mut reader,
        "6",
        "students.transition",
        Some(&admin),
        json!({ "studentId": student_id, "status": "graduate" }),
    );
    assert_eq!(
        graduated.get("status").and_then(|v| v.as_str()),
        Some("graduate")
    );

    // Graduation keeps the section on the record.
    let fetched = request_ok_as(
        &mut stdin,
        &mut reader,
        "7",
        "students.get",
        Some(&admin),
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        fetched
            .get("student")
            .and_then(|s| s.get("sectionId"))
            .and_then(|v| v.as_str()),
        Some(section_id.as_str())
    );
}

#[test]
fn enrolling_requires_a_matching_section() {
    let workspace = temp_dir("enrolld-section-match");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let admin = login_admin(&mut stdin, &mut reader);
    let (strand_id, _) = seed_strand_and_section(&mut stdin, &mut reader, &admin, 40);

    // A second strand with its own section.
    let other = request_ok_as(
        &mut stdin,
        &mut reader,
        "1",
        "strands.create",
        Some(&admin),
        json!({ "code": "ABM", "description": "Accountancy, Business and Management" }),
    );
    let other_strand = other.get("id").and_then(|v| v.as_str()).expect("id").to_string();
    let other_section = request_ok_as(
        &mut stdin,
        &mut reader,
        "2",
        "sections.create",
        Some(&admin),
        json!({ "name": "Ledger", "strandId": other_strand, "gradeLevel": 11, "capacity": 30 }),
    );
    let other_section_id = other_section
        .get("id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();

    let created = request_ok_as(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        Some(&admin),
        student_params("200000000002", "Cruz", "Mia", "female", &strand_id, "2025-2026"),
    );
    let student_id = created.get("id").and_then(|v| v.as_str()).expect("id").to_string();
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        "4",
        "students.transition",
        Some(&admin),
        json!({ "studentId": student_id, "status": "passed" }),
    );

    // A STEM student cannot be seated in an ABM section.
    let wrong_strand = request_as(
        &mut stdin,
        &mut reader,
        "5",
        "students.transition",
        Some(&admin),
        json!({ "studentId": student_id, "status": "enrolled", "sectionId": other_section_id }),
    );
    assert_eq!(error_code(&wrong_strand), "bad_params");

    let no_section = request_as(
        &mut stdin,
        &mut reader,
        "6",
        "students.transition",
        Some(&admin),
        json!({ "studentId": student_id, "status": "enrolled" }),
    );
    assert_eq!(error_code(&no_section), "bad_params");
}
