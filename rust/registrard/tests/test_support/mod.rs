#![allow(dead_code)]

use chrono::{Duration, Local, NaiveDate};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_USERNAME: &str = "admin";
pub const PASSWORD: &str = "correct-horse-1";

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
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Sends a request that must fail and returns the whole error object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn error_code(error: &Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn str_at(v: &Value, pointer: &str) -> String {
    v.pointer(pointer)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
        .to_string()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn day(offset: i64) -> String {
    (today() + Duration::days(offset)).format("%Y-%m-%d").to_string()
}

/// Where today falls in the seeded academic year's registration calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    NotStarted,
    Regular,
    Late,
    Closed,
}

impl Window {
    /// (registrationStart, registrationDeadline, lateRegistrationDeadline) as day offsets.
    fn offsets(self) -> (i64, i64, i64) {
        match self {
            Window::NotStarted => (5, 15, 25),
            Window::Regular => (-5, 5, 15),
            Window::Late => (-20, -10, 5),
            Window::Closed => (-30, -20, -10),
        }
    }
}

pub struct Campus {
    pub cs: String,
    pub math: String,
    pub cs_program: String,
    pub math_program: String,
    pub year: String,
    pub semester: String,
    pub instructor: String,
}

/// Opens a fresh workspace, bootstraps the administrator and logs in as them.
pub fn open_as_admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "boot",
        "admin.bootstrap",
        json!({
            "username": ADMIN_USERNAME,
            "password": PASSWORD,
            "email": "admin@uni.test",
            "firstName": "Ada",
            "lastName": "Admin"
        }),
    );
    login(stdin, reader, ADMIN_USERNAME);
}

pub fn login(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, username: &str) -> Value {
    request_ok(
        stdin,
        reader,
        &format!("login-{}", username),
        "session.login",
        json!({ "username": username, "password": PASSWORD }),
    )
}

pub fn create_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    username: &str,
    role: &str,
    department_id: Option<&str>,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("user-{}", username),
        "users.create",
        json!({
            "username": username,
            "password": PASSWORD,
            "email": format!("{}@uni.test", username),
            "firstName": "Test",
            "lastName": username,
            "role": role,
            "departmentId": department_id
        }),
    );
    str_at(&res, "/user/id")
}

/// Seeds two departments, one program each, an academic year positioned on
/// `window`, an active semester and an instructor in computer science.
pub fn seed_campus(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    window: Window,
) -> Campus {
    let cs = request_ok(
        stdin,
        reader,
        "seed-dept-cs",
        "departments.create",
        json!({ "name": "Computer Science", "code": "CS" }),
    );
    let cs = str_at(&cs, "/department/id");
    let math = request_ok(
        stdin,
        reader,
        "seed-dept-math",
        "departments.create",
        json!({ "name": "Mathematics", "code": "MATH" }),
    );
    let math = str_at(&math, "/department/id");

    let cs_program = request_ok(
        stdin,
        reader,
        "seed-prog-cs",
        "programs.create",
        json!({ "name": "BSc Computer Science", "departmentId": cs, "duration": 4 }),
    );
    let cs_program = str_at(&cs_program, "/program/id");
    let math_program = request_ok(
        stdin,
        reader,
        "seed-prog-math",
        "programs.create",
        json!({ "name": "BSc Mathematics", "departmentId": math, "duration": 4 }),
    );
    let math_program = str_at(&math_program, "/program/id");

    let (reg_start, reg_deadline, late_deadline) = window.offsets();
    let year = request_ok(
        stdin,
        reader,
        "seed-year",
        "academicYears.create",
        json!({
            "name": "Current Year",
            "startDate": day(-60),
            "endDate": day(300),
            "registrationStart": day(reg_start),
            "registrationDeadline": day(reg_deadline),
            "lateRegistrationDeadline": day(late_deadline),
            "isActive": true
        }),
    );
    let year = str_at(&year, "/academicYear/id");

    let semester = request_ok(
        stdin,
        reader,
        "seed-semester",
        "semesters.create",
        json!({
            "name": "Semester 1",
            "academicYearId": year,
            "semesterNumber": 1,
            "startDate": day(-10),
            "endDate": day(110),
            "isActive": true,
            "registrationOpen": true
        }),
    );
    let semester = str_at(&semester, "/semester/id");

    let instructor = create_user(stdin, reader, "prof.turing", "instructor", Some(&cs));

    Campus {
        cs,
        math,
        cs_program,
        math_program,
        year,
        semester,
        instructor,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn create_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    code: &str,
    credits: i64,
    department_id: &str,
    year: i64,
    instructor_id: Option<&str>,
    active: bool,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("course-{}", code),
        "courses.create",
        json!({
            "code": code,
            "name": format!("Course {}", code),
            "credits": credits,
            "departmentId": department_id,
            "semester": 1,
            "year": year,
            "instructorId": instructor_id,
            "isActive": active
        }),
    );
    str_at(&res, "/course/id")
}

/// Creates a student record; with `username` set, a linked student account is
/// created first so the student can log in.
pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    number: &str,
    department_id: &str,
    program_id: &str,
    year: i64,
    username: Option<&str>,
) -> String {
    let user_id = username.map(|u| create_user(stdin, reader, u, "student", None));
    let res = request_ok(
        stdin,
        reader,
        &format!("student-{}", number),
        "students.create",
        json!({
            "studentId": number,
            "firstName": "Student",
            "lastName": number,
            "email": format!("{}@students.uni.test", number.to_lowercase()),
            "phone": "555-0100",
            "gender": "F",
            "departmentId": department_id,
            "programId": program_id,
            "year": year,
            "userId": user_id
        }),
    );
    str_at(&res, "/student/id")
}

pub fn logout(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let _ = request_ok(stdin, reader, "logout", "session.logout", json!({}));
}
