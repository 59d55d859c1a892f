//! Read-only GPA and registration reports.
//!
//! Every figure here is computed from published grades only; unpublished
//! grades never leak into averages or distributions.

use super::setup;
use super::students::visible_student;
use crate::domain::{AcademicYear, Department, Grade, LetterGrade, Student};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_str, load_or_not_found, query_rows,
    run_authed, Conditions, Op,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller};
use crate::present;
use crate::rules::{self, GradeCredit};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{json, Value};

/// One published grade with the course and semester fields reports need.
#[derive(Debug, Clone)]
struct ReportRow {
    letter: LetterGrade,
    credits: i64,
    course_code: String,
    course_name: String,
    semester_name: String,
}

impl ReportRow {
    const SELECT: &'static str = "SELECT g.grade, c.credits, c.code, c.name, sem.name
         FROM grades g
         JOIN courses c ON c.id = g.course_id
         JOIN semesters sem ON sem.id = g.semester_id";

    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = r.get(0)?;
        let letter = LetterGrade::parse(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown letter grade: {}", raw).into(),
            )
        })?;
        Ok(Self {
            letter,
            credits: r.get(1)?,
            course_code: r.get(2)?,
            course_name: r.get(3)?,
            semester_name: r.get(4)?,
        })
    }

    fn points(&self) -> Option<f64> {
        rules::grade_points(self.letter)
    }

    fn credit(&self) -> GradeCredit {
        GradeCredit {
            points: self.points(),
            credits: self.credits,
        }
    }
}

fn published_rows(conn: &Connection, conds: &mut Conditions, order: &str) -> Result<Vec<ReportRow>, HandlerErr> {
    conds.push("g.is_published = 1", Vec::new());
    let sql = format!("{}{} ORDER BY {}", ReportRow::SELECT, conds.where_sql(), order);
    query_rows(conn, &sql, conds, ReportRow::from_row)
}

/// Cumulative GPA of one student with the published grades behind it.
/// Department heads only count their own department's courses.
fn analytics_student_cgpa(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let student = visible_student(conn, caller, &get_required_str(params, "studentId")?)?;
    let course_department = if caller.can(Action::ViewDepartmentReports) {
        caller.department_id.clone()
    } else {
        None
    };

    let mut conds = Conditions::new();
    conds.push_eq("g.student_id", Some(student.id.clone()));
    conds.push_eq("c.department_id", course_department.clone());
    let rows = published_rows(conn, &mut conds, "sem.start_date, c.code")?;
    let summary = rules::gpa_summary(rows.iter().map(ReportRow::credit));

    let breakdown: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "courseCode": row.course_code,
                "courseName": row.course_name,
                "grade": row.letter.as_str(),
                "points": row.points(),
                "credits": row.credits,
                "semester": row.semester_name,
            })
        })
        .collect();
    let status = if rows.is_empty() {
        "No grades available"
    } else {
        rules::academic_status(summary.gpa)
    };
    let mut out = json!({
        "studentId": student.id,
        "studentNumber": student.student_id,
        "studentName": student.full_name(),
        "department": present::department_name(conn, &student.department_id)?,
        "cgpa": summary.gpa,
        "totalCredits": rows.iter().map(|r| r.credits).sum::<i64>(),
        "totalCourses": summary.course_count,
        "academicStatus": status,
        "gradesBreakdown": breakdown,
    });
    if rows.is_empty() {
        out["message"] = json!("No published grades available");
    }
    Ok(out)
}

/// Per-student standing across the department head's department.
fn analytics_department_statistics(conn: &Connection, caller: &Caller, _params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ViewDepartmentReports)?;
    let Some(dept_id) = caller.department_id.clone() else {
        return Err(HandlerErr::forbidden("no department is linked to this account"));
    };
    let department = load_or_not_found(Department::load(conn, &dept_id), "department")?;

    let mut conds = Conditions::new();
    conds.push_eq("s.department_id", Some(dept_id.clone()));
    let sql = format!("{}{} ORDER BY s.student_id", Student::SELECT, conds.where_sql());
    let students = query_rows(conn, &sql, &conds, Student::from_row)?;

    let mut standings = Vec::with_capacity(students.len());
    let mut graded_cgpas = Vec::new();
    for s in &students {
        let standing = present::student_standing(conn, s, Some(dept_id.as_str()))?;
        if standing["totalCourses"].as_u64().unwrap_or(0) > 0 {
            graded_cgpas.push(standing["cgpa"].as_f64().unwrap_or(0.0));
        }
        standings.push(standing);
    }
    let average = if graded_cgpas.is_empty() {
        0.0
    } else {
        rules::round2(graded_cgpas.iter().sum::<f64>() / graded_cgpas.len() as f64)
    };

    Ok(json!({
        "department": department.name,
        "totalStudents": students.len(),
        "studentsWithGrades": graded_cgpas.len(),
        "averageCgpa": average,
        "studentStatistics": standings
    }))
}

fn analytics_all_grades(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ViewRegistrarReports)?;
    let empty = json!({});
    let filters = match params.get("filters") {
        None | Some(Value::Null) => &empty,
        Some(v) if v.is_object() => v,
        Some(_) => return Err(HandlerErr::bad_params("filters must be an object")),
    };
    let student_id = get_optional_str(filters, "studentId")?;
    let department_id = get_optional_str(filters, "departmentId")?;
    let semester_id = get_optional_str(filters, "semesterId")?;
    let academic_year_id = get_optional_str(filters, "academicYearId")?;
    let course_id = get_optional_str(filters, "courseId")?;

    let mut conds = Conditions::new();
    conds.push("g.is_published = 1", Vec::new());
    conds.push_eq("g.student_id", student_id.clone());
    conds.push_eq("c.department_id", department_id.clone());
    conds.push_eq("g.semester_id", semester_id.clone());
    conds.push_eq("sem.academic_year_id", academic_year_id.clone());
    conds.push_eq("g.course_id", course_id.clone());
    let sql = format!(
        "{} JOIN courses c ON c.id = g.course_id
         JOIN semesters sem ON sem.id = g.semester_id{}
         ORDER BY sem.start_date DESC, c.code",
        Grade::SELECT,
        conds.where_sql()
    );
    let rows = query_rows(conn, &sql, &conds, Grade::from_row)?;
    let grades = rows
        .iter()
        .map(|g| present::grade(conn, g))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "grades": grades,
        "totalCount": rows.len(),
        "filtersApplied": {
            "studentId": student_id,
            "departmentId": department_id,
            "semesterId": semester_id,
            "academicYearId": academic_year_id,
            "courseId": course_id
        }
    }))
}

/// GPA, distribution and most recent grades for every matching student, best GPA first.
fn analytics_academic_records(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ViewRegistrarReports)?;
    let department_id = get_optional_str(params, "departmentId")?;
    let year = get_optional_i64(params, "year")?;
    let semester_id = get_optional_str(params, "semesterId")?;
    let recent_limit = setup::analytics_config(conn)?.recent_grades_limit.max(0) as usize;

    let mut conds = Conditions::new();
    conds.push_eq("s.department_id", department_id.clone());
    conds.push_eq_i64("s.year", year);
    let sql = format!("{}{} ORDER BY s.student_id", Student::SELECT, conds.where_sql());
    let students = query_rows(conn, &sql, &conds, Student::from_row)?;

    let mut records: Vec<(f64, Value)> = Vec::with_capacity(students.len());
    for s in &students {
        let mut gconds = Conditions::new();
        gconds.push_eq("g.student_id", Some(s.id.clone()));
        gconds.push_eq("g.semester_id", semester_id.clone());
        let rows = published_rows(conn, &mut gconds, "sem.start_date DESC, c.code")?;
        let summary = rules::gpa_summary(rows.iter().map(ReportRow::credit));
        let distribution = rules::letter_distribution(rows.iter().map(|r| r.letter));
        let recent: Vec<Value> = rows
            .iter()
            .take(recent_limit)
            .map(|row| {
                json!({
                    "courseCode": row.course_code,
                    "courseName": row.course_name,
                    "semester": row.semester_name,
                    "grade": row.letter.as_str(),
                    "points": row.points(),
                    "credits": row.credits,
                })
            })
            .collect();
        records.push((
            summary.gpa,
            json!({
                "studentId": s.id,
                "studentNumber": s.student_id,
                "studentName": s.full_name(),
                "departmentId": s.department_id,
                "department": present::department_name(conn, &s.department_id)?,
                "year": s.year,
                "gpa": summary.gpa,
                "totalCredits": rows.iter().map(|r| r.credits).sum::<i64>(),
                "totalCourses": rows.len(),
                "gradeDistribution": distribution,
                "grades": recent,
            }),
        ));
    }
    records.sort_by(|a, b| b.0.total_cmp(&a.0));
    let records: Vec<Value> = records.into_iter().map(|(_, v)| v).collect();

    Ok(json!({
        "academicRecords": records,
        "totalStudents": records.len(),
        "filtersApplied": {
            "departmentId": department_id,
            "year": year,
            "semesterId": semester_id
        }
    }))
}

fn analytics_department_grade_statistics(
    conn: &Connection,
    caller: &Caller,
    _params: &Value,
) -> Result<Value, HandlerErr> {
    caller.require(Action::ViewRegistrarReports)?;
    let departments = query_rows(
        conn,
        &format!("{} ORDER BY name", Department::SELECT),
        &Conditions::new(),
        Department::from_row,
    )?;

    let mut statistics = Vec::with_capacity(departments.len());
    for d in &departments {
        let total_students: i64 = conn.query_row(
            "SELECT COUNT(*) FROM students WHERE department_id = ?",
            [&d.id],
            |r| r.get(0),
        )?;
        let mut conds = Conditions::new();
        conds.push_eq("c.department_id", Some(d.id.clone()));
        let rows = published_rows(conn, &mut conds, "c.code")?;
        let mut entry = json!({
            "departmentId": d.id,
            "departmentName": d.name,
            "totalStudents": total_students,
            "totalGrades": rows.len(),
        });
        if rows.is_empty() {
            entry["averageGpa"] = json!(0.0);
            entry["gradeDistribution"] = json!({});
            entry["gradePercentages"] = json!({});
            entry["message"] = json!("No grades recorded yet for this department");
        } else {
            let distribution = rules::letter_distribution(rows.iter().map(|r| r.letter));
            entry["averageGpa"] = json!(rules::gpa(rows.iter().map(ReportRow::credit)));
            entry["gradePercentages"] = json!(rules::distribution_percentages(&distribution));
            entry["gradeDistribution"] = json!(distribution);
        }
        statistics.push(entry);
    }
    Ok(json!({ "statistics": statistics }))
}

/// Registration counts and penalty totals for one academic year.
fn analytics_registrations(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ViewRegistrarReports)?;
    let year_id = get_required_str(params, "academicYearId")?;
    let year = load_or_not_found(AcademicYear::load(conn, &year_id), "academic year")?;

    let (total, approved, late, paid, assessed, collected): (i64, i64, i64, i64, f64, f64) = conn
        .query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(is_approved), 0),
                    COALESCE(SUM(is_late_registration), 0),
                    COALESCE(SUM(CASE WHEN is_late_registration = 1 AND penalty_paid = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(penalty_amount), 0.0),
                    COALESCE(SUM(CASE WHEN penalty_paid = 1 THEN penalty_amount ELSE 0 END), 0.0)
             FROM registrations
             WHERE academic_year_id = ?",
            [&year.id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )?;

    let mut stmt = conn.prepare(
        "SELECT sem.id, sem.name, COUNT(r.id), COALESCE(SUM(r.is_approved), 0)
         FROM semesters sem
         LEFT JOIN registrations r ON r.semester_id = sem.id
         WHERE sem.academic_year_id = ?
         GROUP BY sem.id, sem.name, sem.start_date
         ORDER BY sem.start_date",
    )?;
    let by_semester = stmt
        .query_map([&year.id], |r| {
            Ok(json!({
                "semesterId": r.get::<_, String>(0)?,
                "semesterName": r.get::<_, String>(1)?,
                "registrations": r.get::<_, i64>(2)?,
                "approved": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut conds = Conditions::new();
    conds.push(
        "s.id IN (SELECT student_id FROM registrations WHERE academic_year_id = ?)",
        vec![SqlValue::Text(year.id.clone())],
    );
    let by_department: Vec<Value> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT s.department_id, COUNT(*) FROM students s{} GROUP BY s.department_id",
            conds.where_sql()
        ))?;
        let rows = stmt
            .query_map(conds.params(), |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(rows.len());
        for (dept, n) in rows {
            out.push(json!({
                "departmentId": dept,
                "departmentName": present::department_name(conn, &dept)?,
                "students": n,
            }));
        }
        out
    };

    Ok(json!({
        "academicYear": present::academic_year(&year, crate::ipc::helpers::today()),
        "totalRegistrations": total,
        "approved": approved,
        "pending": total - approved,
        "late": late,
        "penaltiesPaid": paid,
        "penaltiesOutstanding": late - paid,
        "penaltyAssessed": rules::round2(assessed),
        "penaltyCollected": rules::round2(collected),
        "bySemester": by_semester,
        "byDepartment": by_department
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: Op = match req.method.as_str() {
        "analytics.studentCgpa" => analytics_student_cgpa,
        "analytics.departmentStatistics" => analytics_department_statistics,
        "analytics.allGrades" => analytics_all_grades,
        "analytics.academicRecords" => analytics_academic_records,
        "analytics.departmentGradeStatistics" => analytics_department_grade_statistics,
        "analytics.registrations" => analytics_registrations,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
