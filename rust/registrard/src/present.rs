//! Response payloads: entity fields plus the derived values clients display.

use crate::domain::{
    total_credits, AcademicProgram, AcademicYear, Course, CourseSlip, Department, Grade,
    Registration, RegistrationPenalty, Semester, Student, UserAccount, DATE_FORMAT,
};
use crate::rules;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn lookup_name(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(sql, [id], |r| r.get(0)).optional()
}

pub fn department_name(conn: &Connection, id: &str) -> rusqlite::Result<Option<String>> {
    lookup_name(conn, "SELECT name FROM departments WHERE id = ?", id)
}

pub fn program_name(conn: &Connection, id: &str) -> rusqlite::Result<Option<String>> {
    lookup_name(conn, "SELECT name FROM academic_programs WHERE id = ?", id)
}

pub fn semester_name(conn: &Connection, id: &str) -> rusqlite::Result<Option<String>> {
    lookup_name(conn, "SELECT name FROM semesters WHERE id = ?", id)
}

pub fn academic_year_name(conn: &Connection, id: &str) -> rusqlite::Result<Option<String>> {
    lookup_name(conn, "SELECT name FROM academic_years WHERE id = ?", id)
}

pub fn user_full_name(conn: &Connection, id: Option<&str>) -> rusqlite::Result<Option<String>> {
    let Some(id) = id else {
        return Ok(None);
    };
    lookup_name(
        conn,
        "SELECT first_name || ' ' || last_name FROM users WHERE id = ?",
        id,
    )
}

fn date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

pub fn department(d: &Department) -> Value {
    json!({
        "id": d.id,
        "name": d.name,
        "code": d.code,
        "createdAt": d.created_at,
    })
}

pub fn program(conn: &Connection, p: &AcademicProgram) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": p.id,
        "name": p.name,
        "departmentId": p.department_id,
        "departmentName": department_name(conn, &p.department_id)?,
        "duration": p.duration,
    }))
}

pub fn academic_year(y: &AcademicYear, today: NaiveDate) -> Value {
    json!({
        "id": y.id,
        "name": y.name,
        "startDate": date(y.start_date),
        "endDate": date(y.end_date),
        "registrationStart": date(y.registration_start),
        "registrationDeadline": date(y.registration_deadline),
        "lateRegistrationDeadline": date(y.late_registration_deadline),
        "isActive": y.is_active,
        "registrationStatus": rules::registration_status(y, today).as_str(),
    })
}

pub fn semester(conn: &Connection, s: &Semester) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": s.id,
        "name": s.name,
        "academicYearId": s.academic_year_id,
        "academicYearName": academic_year_name(conn, &s.academic_year_id)?,
        "semesterNumber": s.semester_number,
        "startDate": date(s.start_date),
        "endDate": date(s.end_date),
        "durationDays": s.duration_days(),
        "isActive": s.is_active,
        "registrationOpen": s.registration_open,
    }))
}

pub fn penalty(conn: &Connection, p: &RegistrationPenalty) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": p.id,
        "academicYearId": p.academic_year_id,
        "academicYearName": academic_year_name(conn, &p.academic_year_id)?,
        "penaltyAmount": rules::round2(p.penalty_amount),
        "description": p.description,
        "isActive": p.is_active,
    }))
}

pub fn student(conn: &Connection, s: &Student) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": s.id,
        "userId": s.user_id,
        "studentId": s.student_id,
        "firstName": s.first_name,
        "lastName": s.last_name,
        "fullName": s.full_name(),
        "email": s.email,
        "phone": s.phone,
        "gender": s.gender,
        "departmentId": s.department_id,
        "departmentName": department_name(conn, &s.department_id)?,
        "programId": s.program_id,
        "programName": program_name(conn, &s.program_id)?,
        "year": s.year,
        "registrationDate": s.registration_date,
        "isActive": s.is_active,
        "cumulativeGpa": rules::student_gpa(conn, &s.id, None)?,
    }))
}

pub fn course_brief(c: &Course) -> Value {
    json!({
        "id": c.id,
        "code": c.code,
        "name": c.name,
        "displayName": c.display_name(),
        "credits": c.credits,
    })
}

pub fn course(conn: &Connection, c: &Course) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": c.id,
        "code": c.code,
        "name": c.name,
        "displayName": c.display_name(),
        "credits": c.credits,
        "departmentId": c.department_id,
        "departmentName": department_name(conn, &c.department_id)?,
        "semester": c.semester,
        "year": c.year,
        "instructorId": c.instructor_id,
        "instructorName": user_full_name(conn, c.instructor_id.as_deref())?,
        "isActive": c.is_active,
    }))
}

fn student_labels(conn: &Connection, student_id: &str) -> rusqlite::Result<(Option<String>, Option<String>)> {
    Ok(match Student::load(conn, student_id)? {
        Some(s) => (Some(s.full_name()), Some(s.student_id)),
        None => (None, None),
    })
}

pub fn registration(conn: &Connection, r: &Registration) -> rusqlite::Result<Value> {
    let courses = r.courses(conn)?;
    let (student_name, student_number) = student_labels(conn, &r.student_id)?;
    Ok(json!({
        "id": r.id,
        "studentId": r.student_id,
        "studentName": student_name,
        "studentNumber": student_number,
        "semesterId": r.semester_id,
        "semesterName": semester_name(conn, &r.semester_id)?,
        "academicYearId": r.academic_year_id,
        "academicYearName": academic_year_name(conn, &r.academic_year_id)?,
        "registeredAt": r.registered_at,
        "isApproved": r.is_approved,
        "approvedBy": r.approved_by,
        "isLateRegistration": r.is_late_registration,
        "penaltyAmount": rules::round2(r.penalty_amount),
        "penaltyPaid": r.penalty_paid,
        "registrationType": r.registration_type.as_str(),
        "courses": courses.iter().map(course_brief).collect::<Vec<_>>(),
        "totalCredits": total_credits(&courses),
    }))
}

pub fn grade(conn: &Connection, g: &Grade) -> rusqlite::Result<Value> {
    let course = Course::load(conn, &g.course_id)?;
    let credits = course.as_ref().map(|c| c.credits).unwrap_or(0);
    let points = g.points();
    let (student_name, student_number) = student_labels(conn, &g.student_id)?;
    Ok(json!({
        "id": g.id,
        "studentId": g.student_id,
        "studentName": student_name,
        "studentNumber": student_number,
        "courseId": g.course_id,
        "courseCode": course.as_ref().map(|c| c.code.clone()),
        "courseName": course.as_ref().map(|c| c.name.clone()),
        "credits": credits,
        "semesterId": g.semester_id,
        "semesterName": semester_name(conn, &g.semester_id)?,
        "grade": g.grade.as_str(),
        "points": points,
        "qualityPoints": rules::quality_points(points, credits),
        "enteredBy": g.entered_by,
        "enteredByName": user_full_name(conn, g.entered_by.as_deref())?,
        "enteredAt": g.entered_at,
        "isPublished": g.is_published,
        "publishedBy": g.published_by,
        "publishedAt": g.published_at,
    }))
}

pub fn course_slip(conn: &Connection, cs: &CourseSlip) -> rusqlite::Result<Value> {
    let courses = cs.courses(conn)?;
    let (student_name, student_number) = student_labels(conn, &cs.student_id)?;
    Ok(json!({
        "id": cs.id,
        "studentId": cs.student_id,
        "studentName": student_name,
        "studentNumber": student_number,
        "semesterId": cs.semester_id,
        "semesterName": semester_name(conn, &cs.semester_id)?,
        "academicYearId": cs.academic_year_id,
        "academicYearName": academic_year_name(conn, &cs.academic_year_id)?,
        "assignedBy": cs.assigned_by,
        "assignedByName": user_full_name(conn, cs.assigned_by.as_deref())?,
        "assignedDate": cs.assigned_date,
        "isApproved": cs.is_approved,
        "approvedBy": cs.approved_by,
        "courses": courses.iter().map(course_brief).collect::<Vec<_>>(),
        "totalCredits": total_credits(&courses),
    }))
}

pub fn user(u: &UserAccount) -> Value {
    json!({
        "id": u.id,
        "username": u.username,
        "email": u.email,
        "firstName": u.first_name,
        "lastName": u.last_name,
        "fullName": u.full_name(),
        "isActive": u.is_active,
        "role": u.role.map(|r| r.as_str()),
        "roleLabel": u.role.map(|r| r.label()),
        "departmentId": u.department_id,
    })
}

/// Per-student cumulative record used by the department and registrar reports.
pub fn student_standing(conn: &Connection, s: &Student, course_department: Option<&str>) -> rusqlite::Result<Value> {
    let mut stmt = conn.prepare(
        "SELECT g.grade, c.credits
         FROM grades g
         JOIN courses c ON c.id = g.course_id
         WHERE g.student_id = ?1
           AND g.is_published = 1
           AND (?2 IS NULL OR c.department_id = ?2)",
    )?;
    let entries = stmt
        .query_map((&s.id, course_department), |r| {
            let letter: String = r.get(0)?;
            let credits: i64 = r.get(1)?;
            Ok((letter, credits))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let summary = rules::gpa_summary(entries.iter().map(|(letter, credits)| rules::GradeCredit {
        points: crate::domain::LetterGrade::parse(letter).and_then(rules::grade_points),
        credits: *credits,
    }));
    let total_credits: i64 = entries.iter().map(|(_, c)| *c).sum();
    let status = if summary.course_count == 0 {
        "No grades available"
    } else {
        rules::academic_status(summary.gpa)
    };
    Ok(json!({
        "studentId": s.id,
        "studentNumber": s.student_id,
        "studentName": s.full_name(),
        "year": s.year,
        "cgpa": summary.gpa,
        "totalCredits": total_credits,
        "totalCourses": summary.course_count,
        "academicStatus": status,
    }))
}
