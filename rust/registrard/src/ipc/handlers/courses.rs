use crate::domain::{Course, Department, Semester, UserAccount, ValidationError};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    bool_to_sql, ensure_unreferenced, get_optional_bool, get_optional_i64, get_optional_str,
    get_required_i64, get_required_str, load_or_not_found, new_id, query_rows, run_authed,
    Conditions, Op,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller, PolicyError, Target};
use crate::present;
use rusqlite::Connection;
use serde_json::{json, Value};

fn check_instructor(conn: &Connection, instructor_id: Option<&str>) -> Result<(), HandlerErr> {
    let Some(id) = instructor_id else {
        return Ok(());
    };
    let account = load_or_not_found(UserAccount::load(conn, id), "instructor")?;
    if !account.role.map(|r| r.can_instruct()).unwrap_or(false) {
        return Err(ValidationError::new(
            "instructorId",
            "instructor must hold the instructor or department head role",
        )
        .into());
    }
    Ok(())
}

fn save_course(conn: &Connection, c: &Course, insert: bool) -> Result<(), HandlerErr> {
    let sql = if insert {
        "INSERT INTO courses(code, name, credits, department_id, semester, year, instructor_id,
            is_active, id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)"
    } else {
        "UPDATE courses SET code = ?, name = ?, credits = ?, department_id = ?, semester = ?,
            year = ?, instructor_id = ?, is_active = ?
         WHERE id = ?"
    };
    conn.execute(
        sql,
        (
            &c.code,
            &c.name,
            c.credits,
            &c.department_id,
            c.semester,
            c.year,
            &c.instructor_id,
            bool_to_sql(c.is_active),
            &c.id,
        ),
    )?;
    Ok(())
}

fn courses_list(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    conds.push_filter(caller.filter(Target::Courses));
    conds.push_eq("c.department_id", get_optional_str(params, "departmentId")?);
    conds.push_eq_i64("c.year", get_optional_i64(params, "year")?);
    conds.push_eq_i64("c.semester", get_optional_i64(params, "semester")?);
    if let Some(active) = get_optional_bool(params, "active")? {
        conds.push("c.is_active = ?", vec![bool_to_sql(active).into()]);
    }
    let sql = format!("{}{} ORDER BY c.code", Course::SELECT, conds.where_sql());
    let rows = query_rows(conn, &sql, &conds, Course::from_row)?;
    let courses = rows
        .iter()
        .map(|c| present::course(conn, c))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

fn courses_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let course = Course {
        id: new_id(),
        code: get_required_str(params, "code")?.to_ascii_uppercase(),
        name: get_required_str(params, "name")?,
        credits: get_required_i64(params, "credits")?,
        department_id: get_required_str(params, "departmentId")?,
        semester: get_required_i64(params, "semester")?,
        year: get_required_i64(params, "year")?,
        instructor_id: get_optional_str(params, "instructorId")?,
        is_active: get_optional_bool(params, "isActive")?.unwrap_or(true),
    };
    course.validate()?;
    load_or_not_found(Department::load(conn, &course.department_id), "department")?;
    check_instructor(conn, course.instructor_id.as_deref())?;
    save_course(conn, &course, true)?;
    Ok(json!({ "course": present::course(conn, &course)? }))
}

fn courses_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "courseId")?;
    let mut c = load_or_not_found(Course::load(conn, &id), "course")?;
    if let Some(v) = get_optional_str(params, "code")? {
        c.code = v.to_ascii_uppercase();
    }
    if let Some(v) = get_optional_str(params, "name")? {
        c.name = v;
    }
    if let Some(v) = get_optional_i64(params, "credits")? {
        c.credits = v;
    }
    if let Some(v) = get_optional_str(params, "departmentId")? {
        load_or_not_found(Department::load(conn, &v), "department")?;
        c.department_id = v;
    }
    if let Some(v) = get_optional_i64(params, "semester")? {
        c.semester = v;
    }
    if let Some(v) = get_optional_i64(params, "year")? {
        c.year = v;
    }
    if params.get("instructorId").is_some() {
        // Explicit null clears the instructor.
        c.instructor_id = get_optional_str(params, "instructorId")?;
    }
    if let Some(v) = get_optional_bool(params, "isActive")? {
        c.is_active = v;
    }
    c.validate()?;
    check_instructor(conn, c.instructor_id.as_deref())?;
    save_course(conn, &c, false)?;
    Ok(json!({ "course": present::course(conn, &c)? }))
}

fn courses_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "courseId")?;
    ensure_unreferenced(
        conn,
        &id,
        &[
            ("grades", "course_id"),
            ("registration_courses", "course_id"),
            ("course_slip_courses", "course_id"),
        ],
        "course",
    )?;
    let n = conn.execute("DELETE FROM courses WHERE id = ?", [&id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("course"));
    }
    Ok(json!({ "deleted": true }))
}

/// Instructor dashboard: own courses with activity counts for the current semester.
fn courses_mine(conn: &Connection, caller: &Caller, _params: &Value) -> Result<Value, HandlerErr> {
    if !caller.role.can_instruct() {
        return Err(PolicyError::Forbidden {
            role: caller.role.as_str(),
            action: "view an instructor dashboard",
        }
        .into());
    }
    let mut conds = Conditions::new();
    conds.push_eq("c.instructor_id", Some(caller.user_id.clone()));
    let sql = format!("{}{} ORDER BY c.code", Course::SELECT, conds.where_sql());
    let courses = query_rows(conn, &sql, &conds, Course::from_row)?;
    let current = Semester::current(conn)?;

    let mut out = Vec::with_capacity(courses.len());
    for c in &courses {
        let (registered, entered, published): (i64, i64, i64) = match &current {
            Some(sem) => (
                conn.query_row(
                    "SELECT COUNT(DISTINCT r.student_id)
                     FROM registrations r
                     JOIN registration_courses rc ON rc.registration_id = r.id
                     WHERE rc.course_id = ? AND r.semester_id = ? AND r.is_approved = 1",
                    (&c.id, &sem.id),
                    |r| r.get(0),
                )?,
                conn.query_row(
                    "SELECT COUNT(*) FROM grades
                     WHERE course_id = ? AND semester_id = ? AND entered_by = ?",
                    (&c.id, &sem.id, &caller.user_id),
                    |r| r.get(0),
                )?,
                conn.query_row(
                    "SELECT COUNT(*) FROM grades
                     WHERE course_id = ? AND semester_id = ? AND is_published = 1",
                    (&c.id, &sem.id),
                    |r| r.get(0),
                )?,
            ),
            None => (0, 0, 0),
        };
        let mut v = present::course(conn, c)?;
        v["registeredStudents"] = json!(registered);
        v["gradesEntered"] = json!(entered);
        v["gradesPublished"] = json!(published);
        out.push(v);
    }

    Ok(json!({
        "instructor": caller.username,
        "totalCourses": courses.len(),
        "currentSemester": current.as_ref().map(|s| s.name.clone()),
        "courses": out
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: Op = match req.method.as_str() {
        "courses.list" => courses_list,
        "courses.create" => courses_create,
        "courses.update" => courses_update,
        "courses.delete" => courses_delete,
        "courses.mine" => courses_mine,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
