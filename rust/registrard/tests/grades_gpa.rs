mod test_support;

use serde_json::{json, Value};
use test_support::{
    create_course, create_student, create_user, day, error_code, login, logout, open_as_admin,
    request_err, request_ok, seed_campus, spawn_sidecar, str_at, Window, ADMIN_USERNAME,
};

fn grades_of(result: &Value) -> Vec<Value> {
    result
        .get("grades")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("grades array")
}

#[test]
fn published_grades_drive_the_credit_weighted_cgpa() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_as_admin(&mut stdin, &mut reader, "registrard-grades-gpa");
    let campus = seed_campus(&mut stdin, &mut reader, Window::Regular);
    let prof = Some(campus.instructor.as_str());
    let algo = create_course(&mut stdin, &mut reader, "CS210", 3, &campus.cs, 2, prof, true);
    let db = create_course(&mut stdin, &mut reader, "CS220", 4, &campus.cs, 2, prof, true);
    let os = create_course(&mut stdin, &mut reader, "CS230", 3, &campus.cs, 2, prof, true);
    let thesis = create_course(&mut stdin, &mut reader, "CS240", 3, &campus.cs, 2, prof, true);
    let student = create_student(
        &mut stdin,
        &mut reader,
        "CS-2001",
        &campus.cs,
        &campus.cs_program,
        2,
        Some("alan.k"),
    );

    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, "prof.turing");
    let mut grade_ids = Vec::new();
    for (i, (course, letter)) in [(&algo, "A"), (&db, "B+"), (&os, "F"), (&thesis, "I")]
        .iter()
        .enumerate()
    {
        let entered = request_ok(
            &mut stdin,
            &mut reader,
            &format!("enter-{}", i),
            "grades.enter",
            json!({
                "courseId": course,
                "studentId": student,
                "semesterId": campus.semester,
                "grade": letter
            }),
        );
        assert_eq!(
            entered.pointer("/grade/isPublished").and_then(|v| v.as_bool()),
            Some(false)
        );
        grade_ids.push(str_at(&entered, "/grade/id"));
    }

    // Incomplete carries no points at all.
    let all = request_ok(&mut stdin, &mut reader, "1", "grades.list", json!({ "studentId": student }));
    let incomplete = grades_of(&all)
        .into_iter()
        .find(|g| g.get("grade").and_then(|v| v.as_str()) == Some("I"))
        .expect("incomplete grade");
    assert_eq!(incomplete.get("points"), Some(&Value::Null));
    let b_plus = grades_of(&all)
        .into_iter()
        .find(|g| g.get("grade").and_then(|v| v.as_str()) == Some("B+"))
        .expect("B+ grade");
    assert_eq!(b_plus.get("points").and_then(|v| v.as_f64()), Some(3.5));
    assert_eq!(b_plus.get("qualityPoints").and_then(|v| v.as_f64()), Some(14.0));

    // Re-entering the same course and semester is a conflict.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "grades.enter",
        json!({
            "courseId": algo,
            "studentId": student,
            "semesterId": campus.semester,
            "grade": "B"
        }),
    );
    assert_eq!(error_code(&e), "conflict");
    assert_eq!(
        e.pointer("/details/gradeId").and_then(|v| v.as_str()),
        Some(grade_ids[0].as_str())
    );

    // Nothing published yet: the student sees no grades and a zero CGPA.
    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, "alan.k");
    let mine = request_ok(&mut stdin, &mut reader, "3", "grades.list", json!({}));
    assert!(grades_of(&mine).is_empty());
    let cgpa = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "analytics.studentCgpa",
        json!({ "studentId": student }),
    );
    assert_eq!(cgpa.get("cgpa").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(
        cgpa.get("academicStatus").and_then(|v| v.as_str()),
        Some("No grades available")
    );

    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, "prof.turing");
    for (i, id) in grade_ids.iter().take(3).enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("publish-{}", i),
            "grades.publish",
            json!({ "gradeId": id }),
        );
    }
    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "grades.publish",
        json!({ "gradeId": grade_ids[0] }),
    );
    assert_eq!(error_code(&e), "conflict");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "grades.delete",
        json!({ "gradeId": grade_ids[0] }),
    );
    assert_eq!(error_code(&e), "conflict");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "6b",
        "grades.update",
        json!({ "gradeId": grade_ids[0], "grade": "F" }),
    );
    assert_eq!(error_code(&e), "conflict");

    // (4.0*3 + 3.5*4 + 0.0*3) / 10 = 2.6
    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, "alan.k");
    let mine = request_ok(&mut stdin, &mut reader, "7", "grades.list", json!({}));
    assert_eq!(grades_of(&mine).len(), 3);
    assert!(grades_of(&mine)
        .iter()
        .all(|g| g.get("isPublished").and_then(|v| v.as_bool()) == Some(true)));
    let cgpa = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "analytics.studentCgpa",
        json!({ "studentId": student }),
    );
    assert_eq!(cgpa.get("cgpa").and_then(|v| v.as_f64()), Some(2.6));
    assert_eq!(cgpa.get("totalCredits").and_then(|v| v.as_i64()), Some(10));
    assert_eq!(cgpa.get("totalCourses").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(cgpa.get("academicStatus").and_then(|v| v.as_str()), Some("Good"));

    let me = request_ok(&mut stdin, &mut reader, "9", "students.get", json!({ "id": student }));
    assert_eq!(me.pointer("/student/cumulativeGpa").and_then(|v| v.as_f64()), Some(2.6));
}

#[test]
fn only_the_course_instructor_may_enter_grades() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_as_admin(&mut stdin, &mut reader, "registrard-grades-instructor");
    let campus = seed_campus(&mut stdin, &mut reader, Window::Regular);
    let course = create_course(
        &mut stdin,
        &mut reader,
        "CS250",
        3,
        &campus.cs,
        2,
        Some(campus.instructor.as_str()),
        true,
    );
    let student = create_student(
        &mut stdin,
        &mut reader,
        "CS-2002",
        &campus.cs,
        &campus.cs_program,
        2,
        None,
    );
    let _ = create_user(&mut stdin, &mut reader, "prof.hopper", "instructor", Some(&campus.cs));
    let params = json!({
        "courseId": course,
        "studentId": student,
        "semesterId": campus.semester,
        "grade": "B"
    });

    // Administrators manage the catalog but do not grade.
    let e = request_err(&mut stdin, &mut reader, "1", "grades.enter", params.clone());
    assert_eq!(error_code(&e), "forbidden");

    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, "prof.hopper");
    let e = request_err(&mut stdin, &mut reader, "2", "grades.enter", params.clone());
    assert_eq!(error_code(&e), "forbidden");

    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, "prof.turing");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "grades.enter",
        json!({
            "courseId": course,
            "studentId": student,
            "semesterId": campus.semester,
            "grade": "B",
            "points": 3.5
        }),
    );
    assert_eq!(error_code(&e), "validation_failed");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "grades.enter",
        json!({
            "courseId": course,
            "studentId": student,
            "semesterId": campus.semester,
            "grade": "Z"
        }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let entered = request_ok(&mut stdin, &mut reader, "5", "grades.enter", params);
    let grade_id = str_at(&entered, "/grade/id");
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.update",
        json!({ "gradeId": grade_id, "grade": "A-", "points": 3.75 }),
    );
    assert_eq!(
        updated.pointer("/grade/points").and_then(|v| v.as_f64()),
        Some(3.75)
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grades.delete",
        json!({ "gradeId": grade_id }),
    );

    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, ADMIN_USERNAME);
    let left = request_ok(&mut stdin, &mut reader, "8", "grades.list", json!({}));
    assert!(grades_of(&left).is_empty());
}

#[test]
fn graded_records_cannot_be_deleted_or_moved() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_as_admin(&mut stdin, &mut reader, "registrard-grades-history");
    let campus = seed_campus(&mut stdin, &mut reader, Window::Regular);
    let prof = Some(campus.instructor.as_str());
    let graded = create_course(&mut stdin, &mut reader, "CS260", 3, &campus.cs, 2, prof, true);
    let spare = create_course(&mut stdin, &mut reader, "CS261", 3, &campus.cs, 2, prof, true);
    let student = create_student(
        &mut stdin,
        &mut reader,
        "CS-2003",
        &campus.cs,
        &campus.cs_program,
        2,
        None,
    );

    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, "prof.turing");
    let entered = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.enter",
        json!({
            "courseId": graded,
            "studentId": student,
            "semesterId": campus.semester,
            "grade": "A"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.publish",
        json!({ "gradeId": str_at(&entered, "/grade/id") }),
    );

    logout(&mut stdin, &mut reader);
    login(&mut stdin, &mut reader, ADMIN_USERNAME);
    let e = request_err(&mut stdin, &mut reader, "3", "courses.delete", json!({ "courseId": graded }));
    assert_eq!(error_code(&e), "conflict");
    assert_eq!(e.pointer("/details/table").and_then(|v| v.as_str()), Some("grades"));
    let e = request_err(&mut stdin, &mut reader, "4", "students.delete", json!({ "id": student }));
    assert_eq!(error_code(&e), "conflict");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "semesters.delete",
        json!({ "semesterId": campus.semester }),
    );
    assert_eq!(error_code(&e), "conflict");

    let next_year = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "academicYears.create",
        json!({
            "name": "Next Year",
            "startDate": day(310),
            "endDate": day(660),
            "registrationStart": day(290),
            "registrationDeadline": day(320),
            "lateRegistrationDeadline": day(335)
        }),
    );
    let next_year = str_at(&next_year, "/academicYear/id");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "semesters.update",
        json!({ "semesterId": campus.semester, "academicYearId": next_year }),
    );
    assert_eq!(error_code(&e), "conflict");
    // Renaming in place is still allowed.
    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "semesters.update",
        json!({
            "semesterId": campus.semester,
            "academicYearId": campus.year,
            "name": "Autumn"
        }),
    );
    assert_eq!(str_at(&renamed, "/semester/academicYearId"), campus.year);

    // An empty semester can move.
    let spring = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "semesters.create",
        json!({
            "name": "Semester 2",
            "academicYearId": campus.year,
            "semesterNumber": 2,
            "startDate": day(120),
            "endDate": day(280)
        }),
    );
    let spring = str_at(&spring, "/semester/id");
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "semesters.update",
        json!({ "semesterId": spring, "academicYearId": next_year }),
    );
    assert_eq!(str_at(&moved, "/semester/academicYearId"), next_year);

    let _ = request_ok(&mut stdin, &mut reader, "11", "courses.delete", json!({ "courseId": spare }));
    let cgpa = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "analytics.studentCgpa",
        json!({ "studentId": student }),
    );
    assert_eq!(cgpa.get("cgpa").and_then(|v| v.as_f64()), Some(4.0));
    assert_eq!(cgpa.get("totalCourses").and_then(|v| v.as_i64()), Some(1));
}
