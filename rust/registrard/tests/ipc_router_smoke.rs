mod test_support;

use serde_json::json;
use test_support::{
    error_code, open_as_admin, request, request_err, request_ok, seed_campus, spawn_sidecar,
    temp_dir, Window,
};

#[test]
fn health_and_workspace_lifecycle() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert_eq!(health.get("workspacePath"), Some(&serde_json::Value::Null));
    assert_eq!(health.get("loggedIn").and_then(|v| v.as_bool()), Some(false));

    let e = request_err(&mut stdin, &mut reader, "2", "departments.list", json!({}));
    assert_eq!(error_code(&e), "no_workspace");
    let e = request_err(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(error_code(&e), "no_workspace");

    let e = request_err(&mut stdin, &mut reader, "4", "workspace.select", json!({}));
    assert_eq!(error_code(&e), "bad_params");

    let workspace = temp_dir("registrard-router-smoke");
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected.get("workspacePath").and_then(|v| v.as_str()).is_some());
    assert!(workspace.join("registrar.sqlite3").exists());

    let e = request_err(&mut stdin, &mut reader, "6", "no.such.method", json!({}));
    assert_eq!(error_code(&e), "not_implemented");
}

#[test]
fn router_dispatch_covers_handler_families() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_as_admin(&mut stdin, &mut reader, "registrard-router-families");
    let campus = seed_campus(&mut stdin, &mut reader, Window::Regular);

    // Every family answers with something other than not_implemented.
    let calls = [
        ("session.whoami", json!({})),
        ("users.list", json!({})),
        ("departments.list", json!({})),
        ("departments.statistics", json!({})),
        ("programs.list", json!({ "departmentId": campus.cs })),
        ("academicYears.list", json!({})),
        ("academicYears.statusAll", json!({})),
        ("academicYears.registrationStatus", json!({ "academicYearId": campus.year })),
        ("semesters.list", json!({ "academicYearId": campus.year })),
        ("penalties.list", json!({})),
        ("students.list", json!({})),
        ("courses.list", json!({})),
        ("registrations.list", json!({})),
        ("grades.list", json!({})),
        ("courseSlips.list", json!({})),
        ("courseSlips.studentsWithout", json!({ "semesterId": campus.semester })),
        ("analytics.allGrades", json!({ "filters": {} })),
        ("analytics.academicRecords", json!({})),
        ("analytics.registrations", json!({ "academicYearId": campus.year })),
        ("setup.get", json!({})),
    ];
    for (i, (method, params)) in calls.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("f{}", i), method, params.clone());
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
    }
}

#[test]
fn malformed_line_gets_bad_json_and_the_loop_continues() {
    use std::io::{BufRead, Write};

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("reply is json");
    assert_eq!(v.get("ok").and_then(|x| x.as_bool()), Some(false));
    assert_eq!(
        v.pointer("/error/code").and_then(|x| x.as_str()),
        Some("bad_json")
    );

    let health = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));
    assert!(health.get("version").is_some());
}
