use super::setup;
use crate::db;
use crate::domain::{total_credits, Course, CourseSlip, Semester, Student};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    bool_to_sql, get_optional_str, get_required_str, get_str_list, load_courses,
    load_or_not_found, new_id, query_rows, replace_course_links, run_authed, Conditions, Op,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller, Target};
use crate::present;
use crate::rules;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Loads a student and checks it against the caller's student scope.
fn student_in_scope(conn: &Connection, caller: &Caller, id: &str) -> Result<Student, HandlerErr> {
    let student = load_or_not_found(Student::load(conn, id), "student")?;
    caller.require_student_in_scope(&student)?;
    Ok(student)
}

fn slip_in_scope(conn: &Connection, caller: &Caller, params: &Value) -> Result<(CourseSlip, Student), HandlerErr> {
    let id = get_required_str(params, "courseSlipId")?;
    let slip = load_or_not_found(CourseSlip::load(conn, &id), "course slip")?;
    let student = student_in_scope(conn, caller, &slip.student_id)?;
    Ok((slip, student))
}

/// Course ids the student already holds on other slips for the semester.
fn assigned_elsewhere(
    conn: &Connection,
    student_id: &str,
    semester_id: &str,
    except_slip: Option<&str>,
) -> Result<HashSet<String>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT csc.course_id
         FROM course_slip_courses csc
         JOIN course_slips cs ON cs.id = csc.course_slip_id
         WHERE cs.student_id = ?1 AND cs.semester_id = ?2 AND cs.id <> ?3",
    )?;
    let ids = stmt
        .query_map((student_id, semester_id, except_slip.unwrap_or("")), |r| r.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(ids)
}

/// Runs the full eligibility check and fails with every violation found.
fn check_slip_courses(
    conn: &Connection,
    student: &Student,
    semester: &Semester,
    course_ids: &[String],
    except_slip: Option<&str>,
) -> Result<Vec<Course>, HandlerErr> {
    let config = setup::registration_config(conn)?;
    let found = load_courses(conn, course_ids)?;
    let assigned = assigned_elsewhere(conn, &student.id, &semester.id, except_slip)?;
    let violations =
        rules::validate_slip_courses(student, course_ids, &found, &assigned, config.max_slip_credits);
    if !violations.is_empty() {
        return Err(HandlerErr::violations(
            format!("{} course slip problem(s) found", violations.len()),
            &violations,
        ));
    }
    Ok(found)
}

fn course_ids(params: &Value) -> Result<Vec<String>, HandlerErr> {
    let ids: Vec<String> = get_str_list(params, "courseIds")?
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(HandlerErr::bad_params("courseIds must not be empty"));
    }
    Ok(ids)
}

fn insert_slip(conn: &Connection, slip: &CourseSlip) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO course_slips(id, student_id, semester_id, academic_year_id, assigned_by,
            assigned_date, is_approved, approved_by)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &slip.id,
            &slip.student_id,
            &slip.semester_id,
            &slip.academic_year_id,
            &slip.assigned_by,
            &slip.assigned_date,
            bool_to_sql(slip.is_approved),
            &slip.approved_by,
        ),
    )?;
    Ok(())
}

fn new_slip(student: &Student, semester: &Semester, caller: &Caller, approved: bool) -> CourseSlip {
    CourseSlip {
        id: new_id(),
        student_id: student.id.clone(),
        semester_id: semester.id.clone(),
        academic_year_id: semester.academic_year_id.clone(),
        assigned_by: Some(caller.user_id.clone()),
        assigned_date: db::now_timestamp(),
        is_approved: approved,
        approved_by: if approved {
            Some(caller.user_id.clone())
        } else {
            None
        },
    }
}

/// Finds the student's slip for the semester or creates an approved one.
fn get_or_create_slip(
    conn: &Connection,
    caller: &Caller,
    student: &Student,
    semester: &Semester,
) -> Result<(CourseSlip, bool), HandlerErr> {
    if let Some(existing) = CourseSlip::find(conn, &student.id, &semester.id, &semester.academic_year_id)? {
        return Ok((existing, false));
    }
    let slip = new_slip(student, semester, caller, true);
    insert_slip(conn, &slip)?;
    Ok((slip, true))
}

fn course_slips_list(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    conds.push_filter(caller.filter(Target::CourseSlips));
    conds.push_eq("s.department_id", get_optional_str(params, "departmentId")?);
    conds.push_eq("cs.semester_id", get_optional_str(params, "semesterId")?);
    conds.push_eq("cs.academic_year_id", get_optional_str(params, "academicYearId")?);
    if let Some(q) = get_optional_str(params, "student")? {
        let like = SqlValue::Text(format!("%{}%", q.to_lowercase()));
        conds.push(
            "(lower(s.first_name) LIKE ? OR lower(s.last_name) LIKE ? OR lower(s.student_id) LIKE ?)",
            vec![like.clone(), like.clone(), like],
        );
    }
    match get_optional_str(params, "status")?.as_deref() {
        None => {}
        Some("approved") => conds.push("cs.is_approved = 1", Vec::new()),
        Some("pending") => conds.push("cs.is_approved = 0", Vec::new()),
        Some(_) => return Err(HandlerErr::bad_params("status must be one of: approved, pending")),
    }
    let sql = format!(
        "{} JOIN students s ON s.id = cs.student_id{} ORDER BY cs.assigned_date DESC",
        CourseSlip::SELECT,
        conds.where_sql()
    );
    let rows = query_rows(conn, &sql, &conds, CourseSlip::from_row)?;
    let approved = rows.iter().filter(|cs| cs.is_approved).count();
    let slips = rows
        .iter()
        .map(|cs| present::course_slip(conn, cs))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({
        "courseSlips": slips,
        "totalCount": rows.len(),
        "approvedCount": approved,
        "pendingCount": rows.len() - approved
    }))
}

fn course_slips_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::AssignCourses)?;
    let student = student_in_scope(conn, caller, &get_required_str(params, "studentId")?)?;
    let semester_id = get_required_str(params, "semesterId")?;
    let semester = load_or_not_found(Semester::load(conn, &semester_id), "semester")?;
    let ids = course_ids(params)?;

    if let Some(existing) = CourseSlip::find(conn, &student.id, &semester.id, &semester.academic_year_id)? {
        return Err(HandlerErr::conflict("student already has a course slip for this semester")
            .with_details(json!({ "courseSlipId": existing.id })));
    }
    let courses = check_slip_courses(conn, &student, &semester, &ids, None)?;

    let slip = new_slip(&student, &semester, caller, false);
    let tx = conn.unchecked_transaction()?;
    insert_slip(&tx, &slip)?;
    let course_ids: Vec<String> = courses.iter().map(|c| c.id.clone()).collect();
    replace_course_links(&tx, "course_slip_courses", "course_slip_id", &slip.id, &course_ids)?;
    tx.commit()?;
    Ok(json!({ "courseSlip": present::course_slip(conn, &slip)? }))
}

fn course_slips_set_courses(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::AssignCourses)?;
    let (slip, student) = slip_in_scope(conn, caller, params)?;
    let semester = load_or_not_found(Semester::load(conn, &slip.semester_id), "semester")?;
    let ids = course_ids(params)?;
    let courses = check_slip_courses(conn, &student, &semester, &ids, Some(&slip.id))?;
    let course_ids: Vec<String> = courses.iter().map(|c| c.id.clone()).collect();
    let tx = conn.unchecked_transaction()?;
    replace_course_links(&tx, "course_slip_courses", "course_slip_id", &slip.id, &course_ids)?;
    tx.commit()?;
    Ok(json!({ "courseSlip": present::course_slip(conn, &slip)? }))
}

fn course_slips_approve(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ApproveCourseSlip)?;
    let (mut slip, _) = slip_in_scope(conn, caller, params)?;
    if slip.is_approved {
        return Err(HandlerErr::conflict("course slip is already approved"));
    }
    conn.execute(
        "UPDATE course_slips SET is_approved = 1, approved_by = ? WHERE id = ?",
        (&caller.user_id, &slip.id),
    )?;
    slip.is_approved = true;
    slip.approved_by = Some(caller.user_id.clone());
    tracing::info!(slip = %slip.id, by = %caller.username, "course slip approved");
    Ok(json!({ "courseSlip": present::course_slip(conn, &slip)? }))
}

fn course_slips_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::AssignCourses)?;
    let (slip, _) = slip_in_scope(conn, caller, params)?;
    conn.execute("DELETE FROM course_slips WHERE id = ?", [&slip.id])?;
    Ok(json!({ "deleted": true }))
}

/// Creates or updates the student's slip for the semester with exactly these courses.
fn course_slips_assign(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::AssignCourses)?;
    let student = student_in_scope(conn, caller, &get_required_str(params, "studentId")?)?;
    let semester_id = get_required_str(params, "semesterId")?;
    let semester = load_or_not_found(Semester::load(conn, &semester_id), "semester")?;
    let ids = course_ids(params)?;

    let existing = CourseSlip::find(conn, &student.id, &semester.id, &semester.academic_year_id)?;
    let except = existing.as_ref().map(|s| s.id.as_str());
    let courses = check_slip_courses(conn, &student, &semester, &ids, except)?;
    let course_ids: Vec<String> = courses.iter().map(|c| c.id.clone()).collect();

    let tx = conn.unchecked_transaction()?;
    let (slip, created) = get_or_create_slip(&tx, caller, &student, &semester)?;
    replace_course_links(&tx, "course_slip_courses", "course_slip_id", &slip.id, &course_ids)?;
    tx.commit()?;

    let action = if created { "created" } else { "updated" };
    tracing::info!(student = %student.student_id, semester = %semester.name, action, "courses assigned");
    Ok(json!({
        "courseSlip": present::course_slip(conn, &slip)?,
        "action": action,
        "coursesAssigned": courses.len()
    }))
}

/// Gives every active student all active courses of their department and year.
fn course_slips_auto_assign(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::AutoAssignCourses)?;
    let semester = match get_optional_str(params, "semesterId")? {
        Some(id) => load_or_not_found(Semester::load(conn, &id), "semester")?,
        None => Semester::current(conn)?.ok_or_else(|| {
            HandlerErr::from(crate::domain::ValidationError::new(
                "semesterId",
                "no active semester found",
            ))
        })?,
    };
    let config = setup::registration_config(conn)?;
    let students = query_rows(
        conn,
        &format!("{} WHERE s.is_active = 1 ORDER BY s.student_id", Student::SELECT),
        &Conditions::new(),
        Student::from_row,
    )?;

    let mut created_count = 0usize;
    let mut updated_count = 0usize;
    let mut details = Vec::new();
    let mut skipped = Vec::new();

    let tx = conn.unchecked_transaction()?;
    for student in &students {
        let mut conds = Conditions::new();
        conds.push_eq("c.department_id", Some(student.department_id.clone()));
        conds.push_eq_i64("c.year", Some(student.year));
        conds.push("c.is_active = 1", Vec::new());
        let sql = format!("{}{} ORDER BY c.code", Course::SELECT, conds.where_sql());
        let available = query_rows(&tx, &sql, &conds, Course::from_row)?;
        if available.is_empty() {
            continue;
        }
        let credits = total_credits(&available);
        if credits > config.max_slip_credits {
            skipped.push(json!({
                "studentId": student.student_id,
                "studentName": student.full_name(),
                "reason": format!(
                    "total credits ({}) exceed maximum allowed ({})",
                    credits, config.max_slip_credits
                )
            }));
            continue;
        }
        let ids: Vec<String> = available.iter().map(|c| c.id.clone()).collect();
        let (slip, created) = get_or_create_slip(&tx, caller, student, &semester)?;
        replace_course_links(&tx, "course_slip_courses", "course_slip_id", &slip.id, &ids)?;
        let action = if created {
            created_count += 1;
            "created"
        } else {
            updated_count += 1;
            "updated"
        };
        details.push(json!({
            "studentId": student.student_id,
            "studentName": student.full_name(),
            "departmentName": present::department_name(&tx, &student.department_id)?,
            "year": student.year,
            "coursesAssigned": available.len(),
            "totalCredits": credits,
            "action": action
        }));
    }
    tx.commit()?;

    tracing::info!(
        semester = %semester.name,
        created = created_count,
        updated = updated_count,
        skipped = skipped.len(),
        "automatic course assignment completed"
    );
    Ok(json!({
        "semester": semester.name,
        "createdCount": created_count,
        "updatedCount": updated_count,
        "totalStudents": students.len(),
        "assignmentDetails": details,
        "skipped": skipped
    }))
}

/// The calling student's slip for the current semester plus their full slip history.
fn course_slips_mine(conn: &Connection, caller: &Caller, _params: &Value) -> Result<Value, HandlerErr> {
    let Some(student_id) = caller.student_id.as_deref() else {
        return Err(HandlerErr::not_found("student profile"));
    };
    let student = load_or_not_found(Student::load(conn, student_id), "student")?;
    let current = Semester::current(conn)?;

    let current_slip = match &current {
        Some(sem) => CourseSlip::find(conn, &student.id, &sem.id, &sem.academic_year_id)?,
        None => None,
    };
    let mut conds = Conditions::new();
    conds.push_eq("cs.student_id", Some(student.id.clone()));
    let sql = format!(
        "{} JOIN semesters sem ON sem.id = cs.semester_id{} ORDER BY sem.start_date DESC",
        CourseSlip::SELECT,
        conds.where_sql()
    );
    let all = query_rows(conn, &sql, &conds, CourseSlip::from_row)?;
    let history = all
        .iter()
        .map(|cs| present::course_slip(conn, cs))
        .collect::<Result<Vec<_>, _>>()?;

    let current_semester = match &current {
        Some(sem) => Some(present::semester(conn, sem)?),
        None => None,
    };
    let current_slip = match &current_slip {
        Some(cs) => Some(present::course_slip(conn, cs)?),
        None => None,
    };
    Ok(json!({
        "student": present::student(conn, &student)?,
        "currentSemester": current_semester,
        "hasCourseSlip": current_slip.is_some(),
        "courseSlip": current_slip,
        "courseSlips": history,
        "totalSemesters": all.len()
    }))
}

fn course_slips_students_without(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::AssignCourses)?;
    let semester_id = get_required_str(params, "semesterId")?;
    let semester = load_or_not_found(Semester::load(conn, &semester_id), "semester")?;
    let mut conds = Conditions::new();
    conds.push_filter(caller.filter(Target::Students));
    conds.push("s.is_active = 1", Vec::new());
    conds.push(
        "s.id NOT IN (SELECT student_id FROM course_slips WHERE semester_id = ?)",
        vec![SqlValue::Text(semester.id.clone())],
    );
    let sql = format!("{}{} ORDER BY s.student_id", Student::SELECT, conds.where_sql());
    let rows = query_rows(conn, &sql, &conds, Student::from_row)?;
    let mut students = Vec::with_capacity(rows.len());
    for s in &rows {
        students.push(json!({
            "id": s.id,
            "studentId": s.student_id,
            "name": s.full_name(),
            "departmentId": s.department_id,
            "departmentName": present::department_name(conn, &s.department_id)?,
            "year": s.year,
            "email": s.email
        }));
    }
    Ok(json!({
        "semester": semester.name,
        "students": students,
        "totalCount": rows.len()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: Op = match req.method.as_str() {
        "courseSlips.list" => course_slips_list,
        "courseSlips.create" => course_slips_create,
        "courseSlips.setCourses" => course_slips_set_courses,
        "courseSlips.approve" => course_slips_approve,
        "courseSlips.delete" => course_slips_delete,
        "courseSlips.assign" => course_slips_assign,
        "courseSlips.autoAssign" => course_slips_auto_assign,
        "courseSlips.mine" => course_slips_mine,
        "courseSlips.studentsWithout" => course_slips_students_without,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
