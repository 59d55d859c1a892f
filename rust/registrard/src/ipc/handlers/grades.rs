use crate::db;
use crate::domain::{Course, Grade, LetterGrade, Semester, Student};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    bool_to_sql, get_optional_bool, get_optional_f64, get_optional_str, get_required_str,
    load_or_not_found, new_id, query_rows, run_authed, Conditions, Op,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller, PolicyError, Target};
use crate::present;
use crate::rules;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn letter_param(params: &Value) -> Result<LetterGrade, HandlerErr> {
    let raw = get_required_str(params, "grade")?;
    LetterGrade::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "grade must be one of: {}",
            LetterGrade::ALL.map(|g| g.as_str()).join(", ")
        ))
    })
}

/// Grades are entered and published only by the instructor of the course.
fn require_course_instructor(caller: &Caller, course: &Course, action: Action) -> Result<(), HandlerErr> {
    caller.require(action)?;
    if course.instructor_id.as_deref() != Some(caller.user_id.as_str()) {
        return Err(PolicyError::OutOfScope(format!(
            "only the instructor of {} may {}",
            course.code,
            action.as_str()
        ))
        .into());
    }
    Ok(())
}

fn grade_with_course(conn: &Connection, params: &Value) -> Result<(Grade, Course), HandlerErr> {
    let id = get_required_str(params, "gradeId")?;
    let grade = load_or_not_found(Grade::load(conn, &id), "grade")?;
    let course = load_or_not_found(Course::load(conn, &grade.course_id), "course")?;
    Ok((grade, course))
}

fn grades_list(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    conds.push_filter(caller.filter(Target::Grades));
    conds.push_eq("g.student_id", get_optional_str(params, "studentId")?);
    conds.push_eq("g.course_id", get_optional_str(params, "courseId")?);
    conds.push_eq("g.semester_id", get_optional_str(params, "semesterId")?);
    if let Some(published) = get_optional_bool(params, "published")? {
        conds.push("g.is_published = ?", vec![bool_to_sql(published).into()]);
    }
    let sql = format!("{}{} ORDER BY g.entered_at DESC", Grade::SELECT, conds.where_sql());
    let rows = query_rows(conn, &sql, &conds, Grade::from_row)?;
    let grades = rows
        .iter()
        .map(|g| present::grade(conn, g))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "grades": grades }))
}

fn grades_enter(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let course = load_or_not_found(Course::load(conn, &course_id), "course")?;
    require_course_instructor(caller, &course, Action::EnterGrade)?;

    let student_id = get_required_str(params, "studentId")?;
    let student = load_or_not_found(Student::load(conn, &student_id), "student")?;
    let semester_id = get_required_str(params, "semesterId")?;
    let semester = load_or_not_found(Semester::load(conn, &semester_id), "semester")?;
    let letter = letter_param(params)?;
    rules::validate_points(letter, get_optional_f64(params, "points")?)?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM grades WHERE student_id = ? AND course_id = ? AND semester_id = ?",
            (&student.id, &course.id, &semester.id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing_id) = existing {
        return Err(HandlerErr::conflict(format!(
            "grade already exists for {} in {}",
            student.full_name(),
            course.name
        ))
        .with_details(json!({ "gradeId": existing_id })));
    }

    let grade = Grade {
        id: new_id(),
        student_id: student.id.clone(),
        course_id: course.id.clone(),
        semester_id: semester.id.clone(),
        grade: letter,
        entered_by: Some(caller.user_id.clone()),
        entered_at: db::now_timestamp(),
        is_published: false,
        published_by: None,
        published_at: None,
    };
    conn.execute(
        "INSERT INTO grades(id, student_id, course_id, semester_id, grade, entered_by, entered_at,
            is_published)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0)",
        (
            &grade.id,
            &grade.student_id,
            &grade.course_id,
            &grade.semester_id,
            grade.grade.as_str(),
            &grade.entered_by,
            &grade.entered_at,
        ),
    )?;
    tracing::info!(course = %course.code, student = %student.student_id, grade = letter.as_str(), "grade entered");
    Ok(json!({ "grade": present::grade(conn, &grade)? }))
}

fn grades_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let (mut grade, course) = grade_with_course(conn, params)?;
    require_course_instructor(caller, &course, Action::EnterGrade)?;
    if grade.is_published {
        return Err(HandlerErr::conflict("published grades cannot be changed"));
    }
    let letter = letter_param(params)?;
    rules::validate_points(letter, get_optional_f64(params, "points")?)?;
    conn.execute(
        "UPDATE grades SET grade = ? WHERE id = ?",
        (letter.as_str(), &grade.id),
    )?;
    grade.grade = letter;
    Ok(json!({ "grade": present::grade(conn, &grade)? }))
}

fn grades_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let (grade, course) = grade_with_course(conn, params)?;
    require_course_instructor(caller, &course, Action::EnterGrade)?;
    if grade.is_published {
        return Err(HandlerErr::conflict("published grades cannot be deleted"));
    }
    conn.execute("DELETE FROM grades WHERE id = ?", [&grade.id])?;
    Ok(json!({ "deleted": true }))
}

fn grades_publish(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let (mut grade, course) = grade_with_course(conn, params)?;
    require_course_instructor(caller, &course, Action::PublishGrade)?;
    if grade.is_published {
        return Err(HandlerErr::conflict("grade is already published"));
    }
    let now = db::now_timestamp();
    conn.execute(
        "UPDATE grades SET is_published = 1, published_by = ?, published_at = ? WHERE id = ?",
        (&caller.user_id, &now, &grade.id),
    )?;
    grade.is_published = true;
    grade.published_by = Some(caller.user_id.clone());
    grade.published_at = Some(now);
    tracing::info!(grade = %grade.id, course = %course.code, "grade published");
    Ok(json!({ "grade": present::grade(conn, &grade)? }))
}

/// Every grade recorded against the department head's courses.
fn grades_department(conn: &Connection, caller: &Caller, _params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ViewDepartmentReports)?;
    let Some(dept_id) = caller.department_id.clone() else {
        return Err(HandlerErr::forbidden("no department is linked to this account"));
    };
    let mut conds = Conditions::new();
    conds.push_eq("c.department_id", Some(dept_id.clone()));
    let sql = format!(
        "{} JOIN courses c ON c.id = g.course_id{} ORDER BY g.entered_at DESC",
        Grade::SELECT,
        conds.where_sql()
    );
    let rows = query_rows(conn, &sql, &conds, Grade::from_row)?;
    let published = rows.iter().filter(|g| g.is_published).count();
    let grades = rows
        .iter()
        .map(|g| present::grade(conn, g))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({
        "department": present::department_name(conn, &dept_id)?,
        "totalGrades": rows.len(),
        "publishedGrades": published,
        "unpublishedGrades": rows.len() - published,
        "grades": grades
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: Op = match req.method.as_str() {
        "grades.list" => grades_list,
        "grades.enter" => grades_enter,
        "grades.update" => grades_update,
        "grades.delete" => grades_delete,
        "grades.publish" => grades_publish,
        "grades.department" => grades_department,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
