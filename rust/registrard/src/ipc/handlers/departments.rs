use crate::db;
use crate::domain::{AcademicProgram, Department};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_i64, get_required_str, load_or_not_found,
    new_id, query_rows, run_authed, run_open, Conditions, Op,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller};
use crate::present;
use rusqlite::Connection;
use serde_json::{json, Value};

fn departments_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let conds = Conditions::new();
    let sql = format!("{} ORDER BY name", Department::SELECT);
    let rows = query_rows(conn, &sql, &conds, Department::from_row)?;
    Ok(json!({ "departments": rows.iter().map(present::department).collect::<Vec<_>>() }))
}

fn departments_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let dept = Department {
        id: new_id(),
        name: get_required_str(params, "name")?,
        code: get_required_str(params, "code")?.to_ascii_uppercase(),
        created_at: db::now_timestamp(),
    };
    dept.validate()?;
    conn.execute(
        "INSERT INTO departments(id, name, code, created_at) VALUES(?, ?, ?, ?)",
        (&dept.id, &dept.name, &dept.code, &dept.created_at),
    )?;
    Ok(json!({ "department": present::department(&dept) }))
}

fn departments_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "departmentId")?;
    let mut dept = load_or_not_found(Department::load(conn, &id), "department")?;
    if let Some(name) = get_optional_str(params, "name")? {
        dept.name = name;
    }
    if let Some(code) = get_optional_str(params, "code")? {
        dept.code = code.to_ascii_uppercase();
    }
    dept.validate()?;
    conn.execute(
        "UPDATE departments SET name = ?, code = ? WHERE id = ?",
        (&dept.name, &dept.code, &dept.id),
    )?;
    Ok(json!({ "department": present::department(&dept) }))
}

fn departments_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "departmentId")?;
    let n = conn.execute("DELETE FROM departments WHERE id = ?", [&id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("department"));
    }
    Ok(json!({ "deleted": true }))
}

fn departments_statistics(conn: &Connection, _caller: &Caller, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.name, d.code,
           (SELECT COUNT(*) FROM students s WHERE s.department_id = d.id) AS student_count,
           (SELECT COUNT(*) FROM courses c WHERE c.department_id = d.id) AS course_count
         FROM departments d
         ORDER BY d.name",
    )?;
    let departments = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let code: String = r.get(2)?;
            let student_count: i64 = r.get(3)?;
            let course_count: i64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "studentCount": student_count,
                "courseCount": course_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let total_students: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
    let total_courses: i64 = conn.query_row("SELECT COUNT(*) FROM courses", [], |r| r.get(0))?;
    Ok(json!({
        "departments": departments,
        "totalStudents": total_students,
        "totalCourses": total_courses
    }))
}

fn programs_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    conds.push_eq("department_id", get_optional_str(params, "departmentId")?);
    let sql = format!("{}{} ORDER BY name", AcademicProgram::SELECT, conds.where_sql());
    let rows = query_rows(conn, &sql, &conds, AcademicProgram::from_row)?;
    let programs = rows
        .iter()
        .map(|p| present::program(conn, p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "programs": programs }))
}

fn programs_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let program = AcademicProgram {
        id: new_id(),
        name: get_required_str(params, "name")?,
        department_id: get_required_str(params, "departmentId")?,
        duration: get_required_i64(params, "duration")?,
    };
    program.validate()?;
    load_or_not_found(Department::load(conn, &program.department_id), "department")?;
    conn.execute(
        "INSERT INTO academic_programs(id, name, department_id, duration) VALUES(?, ?, ?, ?)",
        (&program.id, &program.name, &program.department_id, program.duration),
    )?;
    Ok(json!({ "program": present::program(conn, &program)? }))
}

fn programs_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "programId")?;
    let mut program = load_or_not_found(AcademicProgram::load(conn, &id), "program")?;
    if let Some(name) = get_optional_str(params, "name")? {
        program.name = name;
    }
    if let Some(duration) = get_optional_i64(params, "duration")? {
        program.duration = duration;
    }
    if let Some(dept) = get_optional_str(params, "departmentId")? {
        load_or_not_found(Department::load(conn, &dept), "department")?;
        program.department_id = dept;
    }
    program.validate()?;
    conn.execute(
        "UPDATE academic_programs SET name = ?, department_id = ?, duration = ? WHERE id = ?",
        (&program.name, &program.department_id, program.duration, &program.id),
    )?;
    Ok(json!({ "program": present::program(conn, &program)? }))
}

fn programs_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "programId")?;
    let n = conn.execute("DELETE FROM academic_programs WHERE id = ?", [&id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("program"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "departments.list" => return Some(run_open(state, req, departments_list)),
        "programs.list" => return Some(run_open(state, req, programs_list)),
        _ => {}
    }
    let op: Op = match req.method.as_str() {
        "departments.create" => departments_create,
        "departments.update" => departments_update,
        "departments.delete" => departments_delete,
        "departments.statistics" => departments_statistics,
        "programs.create" => programs_create,
        "programs.update" => programs_update,
        "programs.delete" => programs_delete,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
