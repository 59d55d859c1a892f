use crate::auth::{self, NewAccount};
use crate::domain::{AcademicProgram, Department, Gender, Role, Student, ValidationError, DATE_FORMAT};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    bool_to_sql, ensure_unreferenced, get_optional_bool, get_optional_i64, get_optional_str,
    get_required_i64, get_required_password, get_required_str, load_or_not_found, new_id,
    query_rows, run_authed, run_open, today, Conditions, Op,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller, PolicyError, Target};
use crate::present;
use crate::rules;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

/// Program must exist and belong to the student's department.
fn check_placement(conn: &Connection, department_id: &str, program_id: &str) -> Result<(), HandlerErr> {
    load_or_not_found(Department::load(conn, department_id), "department")?;
    let program = load_or_not_found(AcademicProgram::load(conn, program_id), "program")?;
    if program.department_id != department_id {
        return Err(ValidationError::new(
            "programId",
            "academic program does not belong to the selected department",
        )
        .into());
    }
    Ok(())
}

fn exists(conn: &Connection, sql: &str, value: &str) -> Result<bool, HandlerErr> {
    Ok(conn
        .query_row(sql, [value], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

fn check_unique_identity(
    conn: &Connection,
    student_id: &str,
    email: &str,
    except_id: Option<&str>,
) -> Result<(), HandlerErr> {
    let except = except_id.unwrap_or("");
    let sid_taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_id = ? AND id <> ?",
            (student_id, except),
            |r| r.get(0),
        )
        .optional()?;
    if sid_taken.is_some() {
        return Err(HandlerErr::conflict("student id already exists"));
    }
    let email_taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE email = ? AND id <> ?",
            (email, except),
            |r| r.get(0),
        )
        .optional()?;
    if email_taken.is_some() {
        return Err(HandlerErr::conflict("email already exists"));
    }
    Ok(())
}

fn insert_student(conn: &Connection, s: &Student) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO students(id, user_id, student_id, first_name, last_name, email, phone,
            gender, department_id, program_id, year, registration_date, is_active)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &s.id,
            &s.user_id,
            &s.student_id,
            &s.first_name,
            &s.last_name,
            &s.email,
            &s.phone,
            &s.gender,
            &s.department_id,
            &s.program_id,
            s.year,
            &s.registration_date,
            bool_to_sql(s.is_active),
        ),
    )?;
    Ok(())
}

fn student_from_params(params: &Value, user_id: Option<String>) -> Result<Student, HandlerErr> {
    let gender_raw = get_required_str(params, "gender")?;
    let gender = Gender::parse(&gender_raw)
        .ok_or_else(|| HandlerErr::from(ValidationError::new("gender", "gender must be M or F")))?;
    Ok(Student {
        id: new_id(),
        user_id,
        student_id: get_required_str(params, "studentId")?,
        first_name: get_required_str(params, "firstName")?,
        last_name: get_required_str(params, "lastName")?,
        email: get_required_str(params, "email")?,
        phone: get_optional_str(params, "phone")?.unwrap_or_default(),
        gender: gender.as_str().to_string(),
        department_id: get_required_str(params, "departmentId")?,
        program_id: get_required_str(params, "programId")?,
        year: get_required_i64(params, "year")?,
        registration_date: today().format(DATE_FORMAT).to_string(),
        is_active: true,
    })
}

/// Loads a student the caller is allowed to see.
pub fn visible_student(conn: &Connection, caller: &Caller, id: &str) -> Result<Student, HandlerErr> {
    let student = load_or_not_found(Student::load(conn, id), "student")?;
    if !caller.can_see(conn, Target::Students, id)? {
        return Err(PolicyError::OutOfScope(format!(
            "student {} is outside your scope",
            student.student_id
        ))
        .into());
    }
    Ok(student)
}

fn students_list(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    conds.push_filter(caller.filter(Target::Students));
    conds.push_eq("s.department_id", get_optional_str(params, "departmentId")?);
    conds.push_eq_i64("s.year", get_optional_i64(params, "year")?);
    if let Some(active) = get_optional_bool(params, "active")? {
        conds.push("s.is_active = ?", vec![bool_to_sql(active).into()]);
    }
    if let Some(q) = get_optional_str(params, "search")? {
        let like = format!("%{}%", q.to_lowercase());
        conds.push(
            "(lower(s.first_name) LIKE ? OR lower(s.last_name) LIKE ? OR lower(s.student_id) LIKE ?)",
            vec![
                SqlValue::Text(like.clone()),
                SqlValue::Text(like.clone()),
                SqlValue::Text(like),
            ],
        );
    }
    let sql = format!(
        "{}{} ORDER BY s.last_name, s.first_name",
        Student::SELECT,
        conds.where_sql()
    );
    let rows = query_rows(conn, &sql, &conds, Student::from_row)?;
    let students = rows
        .iter()
        .map(|s| present::student(conn, s))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let student = visible_student(conn, caller, &id)?;
    Ok(json!({ "student": present::student(conn, &student)? }))
}

fn students_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageStudents)?;
    let user_id = get_optional_str(params, "userId")?;
    if let Some(uid) = user_id.as_deref() {
        if !exists(conn, "SELECT 1 FROM users WHERE id = ?", uid)? {
            return Err(HandlerErr::not_found("user"));
        }
    }
    let student = student_from_params(params, user_id)?;
    student.validate()?;
    check_placement(conn, &student.department_id, &student.program_id)?;
    check_unique_identity(conn, &student.student_id, &student.email, None)?;
    insert_student(conn, &student)?;
    tracing::info!(student = %student.student_id, "student created");
    Ok(json!({ "student": present::student(conn, &student)? }))
}

fn students_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageStudents)?;
    let id = get_required_str(params, "id")?;
    let mut s = load_or_not_found(Student::load(conn, &id), "student")?;
    if let Some(v) = get_optional_str(params, "studentId")? {
        s.student_id = v;
    }
    if let Some(v) = get_optional_str(params, "firstName")? {
        s.first_name = v;
    }
    if let Some(v) = get_optional_str(params, "lastName")? {
        s.last_name = v;
    }
    if let Some(v) = get_optional_str(params, "email")? {
        s.email = v;
    }
    if let Some(v) = get_optional_str(params, "phone")? {
        s.phone = v;
    }
    if let Some(v) = get_optional_str(params, "gender")? {
        s.gender = v.to_ascii_uppercase();
    }
    if let Some(v) = get_optional_str(params, "departmentId")? {
        s.department_id = v;
    }
    if let Some(v) = get_optional_str(params, "programId")? {
        s.program_id = v;
    }
    if let Some(v) = get_optional_i64(params, "year")? {
        s.year = v;
    }
    if let Some(v) = get_optional_bool(params, "isActive")? {
        s.is_active = v;
    }
    s.validate()?;
    check_placement(conn, &s.department_id, &s.program_id)?;
    check_unique_identity(conn, &s.student_id, &s.email, Some(&s.id))?;
    conn.execute(
        "UPDATE students SET student_id = ?, first_name = ?, last_name = ?, email = ?, phone = ?,
            gender = ?, department_id = ?, program_id = ?, year = ?, is_active = ?
         WHERE id = ?",
        (
            &s.student_id,
            &s.first_name,
            &s.last_name,
            &s.email,
            &s.phone,
            &s.gender,
            &s.department_id,
            &s.program_id,
            s.year,
            bool_to_sql(s.is_active),
            &s.id,
        ),
    )?;
    Ok(json!({ "student": present::student(conn, &s)? }))
}

const STUDENT_HISTORY: &[(&str, &str)] = &[
    ("grades", "student_id"),
    ("registrations", "student_id"),
    ("course_slips", "student_id"),
];

fn students_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageStudents)?;
    let id = get_required_str(params, "id")?;
    ensure_unreferenced(conn, &id, STUDENT_HISTORY, "student")?;
    let n = conn.execute("DELETE FROM students WHERE id = ?", [&id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("student"));
    }
    Ok(json!({ "deleted": true }))
}

fn students_registration_summary(
    conn: &Connection,
    caller: &Caller,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    let student = visible_student(conn, caller, &id)?;
    let (total, approved, late, unpaid): (i64, i64, i64, f64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(is_approved), 0),
                COALESCE(SUM(is_late_registration), 0),
                COALESCE(SUM(CASE WHEN is_late_registration = 1 AND penalty_paid = 0
                                  THEN penalty_amount ELSE 0 END), 0.0)
         FROM registrations
         WHERE student_id = ?",
        [&student.id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;
    let slips: i64 = conn.query_row(
        "SELECT COUNT(*) FROM course_slips WHERE student_id = ?",
        [&student.id],
        |r| r.get(0),
    )?;
    let cgpa = rules::student_gpa(conn, &student.id, None)?;
    Ok(json!({
        "studentId": student.id,
        "studentNumber": student.student_id,
        "studentName": student.full_name(),
        "registrations": total,
        "approvedRegistrations": approved,
        "pendingRegistrations": total - approved,
        "lateRegistrations": late,
        "outstandingPenalties": rules::round2(unpaid),
        "courseSlips": slips,
        "cumulativeGpa": cgpa,
        "academicStatus": rules::academic_status(cgpa),
    }))
}

fn students_register(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let account = NewAccount {
        username: get_required_str(params, "username")?,
        password: get_required_password(params, "password")?,
        email: get_required_str(params, "email")?,
        first_name: get_required_str(params, "firstName")?,
        last_name: get_required_str(params, "lastName")?,
    };
    account.validate()?;
    if exists(conn, "SELECT 1 FROM users WHERE username = ?", &account.username)? {
        return Err(HandlerErr::conflict("username already exists"));
    }
    let mut student = student_from_params(params, None)?;
    student.validate()?;
    check_placement(conn, &student.department_id, &student.program_id)?;
    check_unique_identity(conn, &student.student_id, &student.email, None)?;

    let tx = conn.unchecked_transaction()?;
    let user_id = auth::create_account(&tx, &account, Role::Student, Some(&student.department_id))?;
    student.user_id = Some(user_id.clone());
    insert_student(&tx, &student)?;
    tx.commit()?;
    tracing::info!(username = %account.username, student = %student.student_id, "student self-registered");

    Ok(json!({
        "userId": user_id,
        "username": account.username,
        "student": present::student(conn, &student)?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    if req.method == "students.register" {
        return Some(run_open(state, req, students_register));
    }
    let op: Op = match req.method.as_str() {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.registrationSummary" => students_registration_summary,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
