use crate::domain::{
    AcademicYear, Course, LetterGrade, RegistrationStatus, RegistrationType, Student,
    ValidationError,
};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

pub const MAX_GRADE_POINTS: f64 = 4.0;
pub const DEFAULT_PENALTY_AMOUNT: f64 = 500.0;
pub const DEFAULT_MAX_SLIP_CREDITS: i64 = 24;

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn grade_points(grade: LetterGrade) -> Option<f64> {
    match grade {
        LetterGrade::APlus | LetterGrade::A => Some(4.00),
        LetterGrade::AMinus => Some(3.75),
        LetterGrade::BPlus => Some(3.50),
        LetterGrade::B => Some(3.00),
        LetterGrade::BMinus => Some(2.75),
        LetterGrade::CPlus => Some(2.50),
        LetterGrade::C => Some(2.00),
        LetterGrade::CMinus => Some(1.75),
        LetterGrade::D => Some(1.00),
        LetterGrade::F => Some(0.00),
        LetterGrade::Incomplete => None,
    }
}

/// Points are never stored independently; a client-supplied value is only
/// accepted when it agrees with the letter.
pub fn validate_points(grade: LetterGrade, supplied: Option<f64>) -> Result<(), ValidationError> {
    let Some(p) = supplied else {
        return Ok(());
    };
    if !p.is_finite() || p > MAX_GRADE_POINTS {
        return Err(ValidationError::new(
            "points",
            format!("grade points cannot exceed 4.00 (got {})", p),
        ));
    }
    match grade_points(grade) {
        Some(expected) if (expected - p).abs() < 1e-9 => Ok(()),
        Some(expected) => Err(ValidationError::new(
            "points",
            format!(
                "points are derived from the letter grade: {} is {:.2}",
                grade.as_str(),
                expected
            ),
        )),
        None => Err(ValidationError::new(
            "points",
            format!("grade {} carries no points", grade.as_str()),
        )),
    }
}

pub fn registration_status(year: &AcademicYear, today: NaiveDate) -> RegistrationStatus {
    if today < year.registration_start {
        RegistrationStatus::NotStarted
    } else if today <= year.registration_deadline {
        RegistrationStatus::Regular
    } else if today <= year.late_registration_deadline {
        RegistrationStatus::Late
    } else {
        RegistrationStatus::Closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("registration for this academic year has not started yet")]
    NotStarted,
    #[error("registration for this academic year is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub is_approved: bool,
    pub is_late_registration: bool,
    pub penalty_amount: f64,
}

/// Window and penalty decision for a new registration. Admin assignments skip
/// the window entirely and are approved on creation.
pub fn assess_registration(
    year: &AcademicYear,
    today: NaiveDate,
    kind: RegistrationType,
    active_penalty: Option<f64>,
    default_penalty: f64,
) -> Result<Assessment, WindowError> {
    if kind == RegistrationType::Admin {
        return Ok(Assessment {
            is_approved: true,
            is_late_registration: false,
            penalty_amount: 0.0,
        });
    }
    match registration_status(year, today) {
        RegistrationStatus::NotStarted => Err(WindowError::NotStarted),
        RegistrationStatus::Closed => Err(WindowError::Closed),
        RegistrationStatus::Regular => Ok(Assessment {
            is_approved: false,
            is_late_registration: false,
            penalty_amount: 0.0,
        }),
        RegistrationStatus::Late => Ok(Assessment {
            is_approved: false,
            is_late_registration: true,
            penalty_amount: round2(active_penalty.unwrap_or(default_penalty)),
        }),
    }
}

pub fn active_penalty_amount(conn: &Connection, academic_year_id: &str) -> rusqlite::Result<Option<f64>> {
    conn.query_row(
        "SELECT penalty_amount
         FROM registration_penalties
         WHERE academic_year_id = ? AND is_active = 1
         ORDER BY created_at, rowid
         LIMIT 1",
        [academic_year_id],
        |r| r.get(0),
    )
    .optional()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeCredit {
    pub points: Option<f64>,
    pub credits: i64,
}

pub fn quality_points(points: Option<f64>, credits: i64) -> f64 {
    match points {
        Some(p) if credits > 0 => p.min(MAX_GRADE_POINTS) * credits as f64,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpaSummary {
    pub gpa: f64,
    pub quality_points: f64,
    pub graded_credits: i64,
    pub course_count: usize,
}

pub fn gpa_summary<I>(entries: I) -> GpaSummary
where
    I: IntoIterator<Item = GradeCredit>,
{
    let mut quality: f64 = 0.0;
    let mut credits: i64 = 0;
    let mut count: usize = 0;
    for e in entries {
        count += 1;
        if e.points.is_some() && e.credits > 0 {
            quality += quality_points(e.points, e.credits);
            credits += e.credits;
        }
    }
    let gpa = if credits > 0 {
        round2(quality / credits as f64).min(MAX_GRADE_POINTS)
    } else {
        0.0
    };
    GpaSummary {
        gpa,
        quality_points: quality,
        graded_credits: credits,
        course_count: count,
    }
}

pub fn gpa<I>(entries: I) -> f64
where
    I: IntoIterator<Item = GradeCredit>,
{
    gpa_summary(entries).gpa
}

pub fn published_grade_credits(
    conn: &Connection,
    student_id: &str,
    semester_id: Option<&str>,
) -> rusqlite::Result<Vec<GradeCredit>> {
    let mut stmt = conn.prepare(
        "SELECT g.grade, c.credits
         FROM grades g
         JOIN courses c ON c.id = g.course_id
         WHERE g.student_id = ?1
           AND g.is_published = 1
           AND (?2 IS NULL OR g.semester_id = ?2)",
    )?;
    let rows = stmt
        .query_map((student_id, semester_id), |r| {
            let letter: String = r.get(0)?;
            Ok(GradeCredit {
                points: LetterGrade::parse(&letter).and_then(grade_points),
                credits: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn student_gpa(conn: &Connection, student_id: &str, semester_id: Option<&str>) -> rusqlite::Result<f64> {
    Ok(gpa(published_grade_credits(conn, student_id, semester_id)?))
}

pub fn academic_status(cgpa: f64) -> &'static str {
    if cgpa >= 3.6 {
        "Excellent"
    } else if cgpa >= 3.0 {
        "Very Good"
    } else if cgpa >= 2.5 {
        "Good"
    } else if cgpa >= 2.0 {
        "Satisfactory"
    } else {
        "Needs Improvement"
    }
}

pub fn letter_distribution<I>(grades: I) -> BTreeMap<String, i64>
where
    I: IntoIterator<Item = LetterGrade>,
{
    let mut out: BTreeMap<String, i64> = BTreeMap::new();
    for g in grades {
        *out.entry(g.as_str().to_string()).or_insert(0) += 1;
    }
    out
}

pub fn distribution_percentages(dist: &BTreeMap<String, i64>) -> BTreeMap<String, f64> {
    let total: i64 = dist.values().sum();
    dist.iter()
        .map(|(k, n)| {
            let pct = if total > 0 {
                round1(100.0 * *n as f64 / total as f64)
            } else {
                0.0
            };
            (k.clone(), pct)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlipViolation {
    pub field: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_name: Option<String>,
    pub errors: Vec<String>,
}

/// Checks every requested course against the student and reports all problems
/// at once. `already_assigned` holds course ids the student already has on
/// another slip for the same semester.
pub fn validate_slip_courses(
    student: &Student,
    requested_ids: &[String],
    found: &[Course],
    already_assigned: &HashSet<String>,
    max_credits: i64,
) -> Vec<SlipViolation> {
    let mut out = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut total_credits: i64 = 0;

    for id in requested_ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        let Some(course) = found.iter().find(|c| &c.id == id) else {
            out.push(SlipViolation {
                field: "courseIds",
                course_id: Some(id.clone()),
                course_code: None,
                course_name: None,
                errors: vec!["course does not exist".to_string()],
            });
            continue;
        };
        total_credits += course.credits;

        let mut errors = Vec::new();
        if course.department_id != student.department_id {
            errors.push(
                "department mismatch: course belongs to another department than the student"
                    .to_string(),
            );
        }
        if course.year != student.year {
            errors.push(format!(
                "academic year mismatch: course is for year {}, student is in year {}",
                course.year, student.year
            ));
        }
        if !course.is_active {
            errors.push("course is not currently active".to_string());
        }
        if already_assigned.contains(&course.id) {
            errors.push("course is already assigned to this student for the semester".to_string());
        }
        if !errors.is_empty() {
            out.push(SlipViolation {
                field: "courseIds",
                course_id: Some(course.id.clone()),
                course_code: Some(course.code.clone()),
                course_name: Some(course.name.clone()),
                errors,
            });
        }
    }

    if total_credits > max_credits {
        out.push(SlipViolation {
            field: "credits",
            course_id: None,
            course_code: None,
            course_name: None,
            errors: vec![format!(
                "total credits ({}) exceed maximum allowed ({})",
                total_credits, max_credits
            )],
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse_date;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).expect("date")
    }

    fn year() -> AcademicYear {
        AcademicYear {
            id: "y1".into(),
            name: "2024/25".into(),
            start_date: d("2024-09-01"),
            end_date: d("2025-06-30"),
            registration_start: d("2024-09-01"),
            registration_deadline: d("2024-09-15"),
            late_registration_deadline: d("2024-09-30"),
            is_active: true,
        }
    }

    fn student() -> Student {
        Student {
            id: "st1".into(),
            user_id: None,
            student_id: "S-001".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.edu".into(),
            phone: "555".into(),
            gender: "F".into(),
            department_id: "cs".into(),
            program_id: "bsc".into(),
            year: 2,
            registration_date: "2024-01-01".into(),
            is_active: true,
        }
    }

    fn course(id: &str, dept: &str, year: i64, credits: i64, active: bool) -> Course {
        Course {
            id: id.into(),
            code: id.to_uppercase(),
            name: format!("Course {}", id),
            credits,
            department_id: dept.into(),
            semester: 1,
            year,
            instructor_id: None,
            is_active: active,
        }
    }

    #[test]
    fn window_boundaries() {
        let y = year();
        assert_eq!(registration_status(&y, d("2024-08-31")), RegistrationStatus::NotStarted);
        assert_eq!(registration_status(&y, d("2024-09-01")), RegistrationStatus::Regular);
        assert_eq!(registration_status(&y, d("2024-09-15")), RegistrationStatus::Regular);
        assert_eq!(registration_status(&y, d("2024-09-16")), RegistrationStatus::Late);
        assert_eq!(registration_status(&y, d("2024-09-30")), RegistrationStatus::Late);
        assert_eq!(registration_status(&y, d("2024-10-01")), RegistrationStatus::Closed);
    }

    #[test]
    fn late_registration_uses_active_penalty_or_default() {
        let y = year();
        let a = assess_registration(&y, d("2024-09-20"), RegistrationType::Student, Some(250.0), 500.0)
            .expect("late is allowed");
        assert!(a.is_late_registration);
        assert_eq!(a.penalty_amount, 250.0);
        assert!(!a.is_approved);

        let a = assess_registration(&y, d("2024-09-20"), RegistrationType::Student, None, 500.0)
            .expect("late is allowed");
        assert_eq!(a.penalty_amount, 500.0);

        let a = assess_registration(&y, d("2024-09-10"), RegistrationType::Student, Some(250.0), 500.0)
            .expect("regular");
        assert!(!a.is_late_registration);
        assert_eq!(a.penalty_amount, 0.0);

        assert_eq!(
            assess_registration(&y, d("2024-10-01"), RegistrationType::Student, None, 500.0),
            Err(WindowError::Closed)
        );
        assert_eq!(
            assess_registration(&y, d("2024-08-01"), RegistrationType::Student, None, 500.0),
            Err(WindowError::NotStarted)
        );
    }

    #[test]
    fn admin_registration_bypasses_window() {
        let y = year();
        let a = assess_registration(&y, d("2025-03-01"), RegistrationType::Admin, Some(250.0), 500.0)
            .expect("admin bypass");
        assert!(a.is_approved);
        assert!(!a.is_late_registration);
        assert_eq!(a.penalty_amount, 0.0);
    }

    #[test]
    fn grade_points_table() {
        assert_eq!(grade_points(LetterGrade::APlus), Some(4.0));
        assert_eq!(grade_points(LetterGrade::A), Some(4.0));
        assert_eq!(grade_points(LetterGrade::BPlus), Some(3.5));
        assert_eq!(grade_points(LetterGrade::CMinus), Some(1.75));
        assert_eq!(grade_points(LetterGrade::F), Some(0.0));
        assert_eq!(grade_points(LetterGrade::Incomplete), None);
        for g in LetterGrade::ALL {
            assert!(grade_points(g).map(|p| p <= MAX_GRADE_POINTS).unwrap_or(true));
            assert_eq!(grade_points(g), grade_points(g));
        }
    }

    #[test]
    fn supplied_points_are_checked() {
        assert!(validate_points(LetterGrade::B, None).is_ok());
        assert!(validate_points(LetterGrade::B, Some(3.0)).is_ok());
        assert!(validate_points(LetterGrade::B, Some(3.5)).is_err());
        assert!(validate_points(LetterGrade::A, Some(4.5)).is_err());
        assert!(validate_points(LetterGrade::Incomplete, Some(0.0)).is_err());
    }

    #[test]
    fn gpa_matches_worked_example() {
        let entries = [
            GradeCredit { points: grade_points(LetterGrade::A), credits: 3 },
            GradeCredit { points: grade_points(LetterGrade::BPlus), credits: 4 },
            GradeCredit { points: grade_points(LetterGrade::F), credits: 3 },
        ];
        assert_eq!(gpa(entries), 2.6);
        assert_eq!(gpa(entries), gpa(entries));
    }

    #[test]
    fn gpa_of_nothing_is_zero_and_incomplete_is_ignored() {
        assert_eq!(gpa(Vec::new()), 0.0);
        let only_incomplete = [GradeCredit { points: None, credits: 3 }];
        assert_eq!(gpa(only_incomplete), 0.0);
        let mixed = [
            GradeCredit { points: None, credits: 3 },
            GradeCredit { points: Some(3.0), credits: 3 },
        ];
        assert_eq!(gpa(mixed), 3.0);
    }

    #[test]
    fn gpa_is_capped() {
        let bogus = [GradeCredit { points: Some(9.0), credits: 3 }];
        assert_eq!(gpa(bogus), 4.0);
        let all_a = [
            GradeCredit { points: Some(4.0), credits: 3 },
            GradeCredit { points: Some(4.0), credits: 4 },
        ];
        let g = gpa(all_a);
        assert!((0.0..=4.0).contains(&g));
    }

    #[test]
    fn academic_status_buckets() {
        assert_eq!(academic_status(3.6), "Excellent");
        assert_eq!(academic_status(3.59), "Very Good");
        assert_eq!(academic_status(3.0), "Very Good");
        assert_eq!(academic_status(2.5), "Good");
        assert_eq!(academic_status(2.0), "Satisfactory");
        assert_eq!(academic_status(1.99), "Needs Improvement");
    }

    #[test]
    fn slip_validation_reports_every_bad_course() {
        let s = student();
        let found = vec![
            course("c1", "cs", 2, 3, true),
            course("c2", "math", 2, 3, true),
            course("c3", "cs", 3, 3, true),
        ];
        let ids: Vec<String> = vec!["c1".into(), "c2".into(), "c3".into()];
        let v = validate_slip_courses(&s, &ids, &found, &HashSet::new(), 24);
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].course_id.as_deref(), Some("c2"));
        assert_eq!(v[1].course_id.as_deref(), Some("c3"));
    }

    #[test]
    fn slip_validation_collects_multiple_reasons_per_course() {
        let s = student();
        let found = vec![course("c1", "math", 4, 3, false)];
        let ids: Vec<String> = vec!["c1".into(), "missing".into()];
        let mut assigned = HashSet::new();
        assigned.insert("c1".to_string());
        let v = validate_slip_courses(&s, &ids, &found, &assigned, 24);
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].errors.len(), 4);
        assert_eq!(v[1].course_id.as_deref(), Some("missing"));
    }

    #[test]
    fn slip_validation_enforces_credit_ceiling() {
        let s = student();
        let found: Vec<Course> = (0..5)
            .map(|i| course(&format!("c{}", i), "cs", 2, 5, true))
            .collect();
        let ids: Vec<String> = found.iter().map(|c| c.id.clone()).collect();
        let v = validate_slip_courses(&s, &ids, &found, &HashSet::new(), 24);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].field, "credits");
        assert!(validate_slip_courses(&s, &ids[..4], &found, &HashSet::new(), 24).is_empty());
    }

    #[test]
    fn distribution_percentages_round_to_one_decimal() {
        let dist = letter_distribution([LetterGrade::A, LetterGrade::A, LetterGrade::B]);
        assert_eq!(dist.get("A"), Some(&2));
        let pct = distribution_percentages(&dist);
        assert_eq!(pct.get("A"), Some(&66.7));
        assert_eq!(pct.get("B"), Some(&33.3));
    }
}
