mod test_support;

use serde_json::{json, Value};
use test_support::{
    create_course, create_student, error_code, login, logout, open_as_admin, request_err,
    request_ok, seed_campus, spawn_sidecar, str_at, Window,
};

fn violations(error: &Value) -> Vec<Value> {
    error
        .pointer("/details/violations")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("violations array")
}

#[test]
fn every_ineligible_course_is_reported_at_once() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_as_admin(&mut stdin, &mut reader, "registrard-slip-violations");
    let campus = seed_campus(&mut stdin, &mut reader, Window::Regular);
    let ok_course = create_course(&mut stdin, &mut reader, "CS301", 3, &campus.cs, 2, None, true);
    let other_dept = create_course(&mut stdin, &mut reader, "MATH301", 3, &campus.math, 2, None, true);
    let other_year = create_course(&mut stdin, &mut reader, "CS401", 3, &campus.cs, 3, None, true);
    let student = create_student(
        &mut stdin,
        &mut reader,
        "CS-3001",
        &campus.cs,
        &campus.cs_program,
        2,
        None,
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "courseSlips.assign",
        json!({
            "studentId": student,
            "semesterId": campus.semester,
            "courseIds": [ok_course, other_dept, other_year]
        }),
    );
    assert_eq!(error_code(&e), "validation_failed");
    let found = violations(&e);
    assert_eq!(found.len(), 2);
    assert_eq!(str_at(&found[0], "/courseId"), other_dept);
    assert!(str_at(&found[0], "/errors/0").contains("department"));
    assert_eq!(str_at(&found[1], "/courseId"), other_year);
    assert!(str_at(&found[1], "/errors/0").contains("year"));

    // Nothing was written for the rejected request.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courseSlips.list",
        json!({ "semesterId": campus.semester }),
    );
    assert_eq!(listed.get("totalCount").and_then(|v| v.as_i64()), Some(0));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "courseSlips.assign",
        json!({ "studentId": student, "semesterId": campus.semester, "courseIds": [] }),
    );
    assert_eq!(error_code(&e), "bad_params");
}

#[test]
fn assignment_is_idempotent_and_respects_the_credit_ceiling() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_as_admin(&mut stdin, &mut reader, "registrard-slip-assign");
    let campus = seed_campus(&mut stdin, &mut reader, Window::Regular);
    let a = create_course(&mut stdin, &mut reader, "CS311", 3, &campus.cs, 2, None, true);
    let b = create_course(&mut stdin, &mut reader, "CS312", 4, &campus.cs, 2, None, true);
    let student = create_student(
        &mut stdin,
        &mut reader,
        "CS-3002",
        &campus.cs,
        &campus.cs_program,
        2,
        Some("edsger.d"),
    );
    let params = json!({
        "studentId": student,
        "semesterId": campus.semester,
        "courseIds": [a, b]
    });

    let first = request_ok(&mut stdin, &mut reader, "1", "courseSlips.assign", params.clone());
    assert_eq!(first.get("action").and_then(|v| v.as_str()), Some("created"));
    assert_eq!(first.get("coursesAssigned").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        first.pointer("/courseSlip/totalCredits").and_then(|v| v.as_i64()),
        Some(7)
    );
    assert_eq!(
        first.pointer("/courseSlip/isApproved").and_then(|v| v.as_bool()),
        Some(true)
    );
    let slip_id = str_at(&first, "/courseSlip/id");

    let second = request_ok(&mut stdin, &mut reader, "2", "courseSlips.assign", params);
    assert_eq!(second.get("action").and_then(|v| v.as_str()), Some("updated"));
    assert_eq!(str_at(&second, "/courseSlip/id"), slip_id);
    assert_eq!(
        second
            .pointer("/courseSlip/courses")
            .and_then(|v| v.as_array())
            .map(|c| c.len()),
        Some(2)
    );

    // A separate slip for the same semester is refused.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "courseSlips.create",
        json!({ "studentId": student, "semesterId": campus.semester, "courseIds": [a] }),
    );
    assert_eq!(error_code(&e), "conflict");

    // Lower the ceiling below the current load.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "registration", "patch": { "maxSlipCredits": 5 } }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "courseSlips.setCourses",
        json!({ "courseSlipId": slip_id, "courseIds": [a, b] }),
    );
    assert_eq!(error_code(&e), "validation_failed");
    let found = violations(&e);
    assert_eq!(found.len(), 1);
    assert_eq!(str_at(&found[0], "/field"), "credits");

    let auto = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courseSlips.autoAssign",
        json!({ "semesterId": campus.semester }),
    );
    assert_eq!(auto.get("createdCount").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(auto.get("updatedCount").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        auto.get("skipped").and_then(|v| v.as_array()).map(|s| s.len()),
        Some(1)
    );

    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, "edsger.d");
    let mine = request_ok(&mut stdin, &mut reader, "7", "courseSlips.mine", json!({}));
    assert_eq!(mine.get("hasCourseSlip").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        mine.pointer("/courseSlip/totalCredits").and_then(|v| v.as_i64()),
        Some(7)
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "courseSlips.assign",
        json!({ "studentId": student, "semesterId": campus.semester, "courseIds": [a] }),
    );
    assert_eq!(error_code(&e), "forbidden");
}

#[test]
fn auto_assign_gives_each_student_their_department_year_courses() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_as_admin(&mut stdin, &mut reader, "registrard-slip-auto");
    let campus = seed_campus(&mut stdin, &mut reader, Window::Regular);
    let _ = create_course(&mut stdin, &mut reader, "CS321", 3, &campus.cs, 2, None, true);
    let _ = create_course(&mut stdin, &mut reader, "CS322", 3, &campus.cs, 2, None, true);
    let _ = create_course(&mut stdin, &mut reader, "CS323", 3, &campus.cs, 2, None, false);
    let _ = create_course(&mut stdin, &mut reader, "MATH321", 4, &campus.math, 1, None, true);
    let _ = create_student(&mut stdin, &mut reader, "CS-3101", &campus.cs, &campus.cs_program, 2, None);
    let _ = create_student(
        &mut stdin,
        &mut reader,
        "MA-3102",
        &campus.math,
        &campus.math_program,
        1,
        None,
    );
    let _ = create_student(&mut stdin, &mut reader, "CS-3103", &campus.cs, &campus.cs_program, 4, None);

    let without = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courseSlips.studentsWithout",
        json!({ "semesterId": campus.semester }),
    );
    assert_eq!(without.get("totalCount").and_then(|v| v.as_i64()), Some(3));

    // No semesterId: the active semester is used.
    let auto = request_ok(&mut stdin, &mut reader, "2", "courseSlips.autoAssign", json!({}));
    assert_eq!(auto.get("createdCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(auto.get("totalStudents").and_then(|v| v.as_i64()), Some(3));
    let details = auto
        .get("assignmentDetails")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("assignmentDetails");
    let cs = details
        .iter()
        .find(|d| d.get("studentId").and_then(|v| v.as_str()) == Some("CS-3101"))
        .expect("CS student assigned");
    assert_eq!(cs.get("coursesAssigned").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(cs.get("totalCredits").and_then(|v| v.as_i64()), Some(6));

    let again = request_ok(&mut stdin, &mut reader, "3", "courseSlips.autoAssign", json!({}));
    assert_eq!(again.get("createdCount").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(again.get("updatedCount").and_then(|v| v.as_i64()), Some(2));

    let without = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courseSlips.studentsWithout",
        json!({ "semesterId": campus.semester }),
    );
    assert_eq!(without.get("totalCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        without.pointer("/students/0/studentId").and_then(|v| v.as_str()),
        Some("CS-3103")
    );
}
