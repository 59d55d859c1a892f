use chrono::NaiveDate;
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Field-level validation failure on a single record.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Instructor,
    Registrar,
    DepartmentHead,
    Administrator,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Student,
        Role::Instructor,
        Role::Registrar,
        Role::DepartmentHead,
        Role::Administrator,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "instructor" => Some(Self::Instructor),
            "registrar" => Some(Self::Registrar),
            "department_head" => Some(Self::DepartmentHead),
            "administrator" => Some(Self::Administrator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Instructor => "instructor",
            Self::Registrar => "registrar",
            Self::DepartmentHead => "department_head",
            Self::Administrator => "administrator",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Instructor => "Instructor",
            Self::Registrar => "Registrar",
            Self::DepartmentHead => "Department Head",
            Self::Administrator => "Administrator",
        }
    }

    pub fn requires_department(self) -> bool {
        matches!(self, Self::DepartmentHead)
    }

    pub fn can_instruct(self) -> bool {
        matches!(self, Self::Instructor | Self::DepartmentHead)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationType {
    Student,
    Admin,
}

impl RegistrationType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    NotStarted,
    Regular,
    Late,
    Closed,
}

impl RegistrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Regular => "regular",
            Self::Late => "late",
            Self::Closed => "closed",
        }
    }
}

/// Letter grades accepted on a grade record. `I` is "incomplete" and carries no points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LetterGrade {
    APlus,
    A,
    AMinus,
    BPlus,
    B,
    BMinus,
    CPlus,
    C,
    CMinus,
    D,
    F,
    Incomplete,
}

impl LetterGrade {
    pub const ALL: [LetterGrade; 12] = [
        LetterGrade::APlus,
        LetterGrade::A,
        LetterGrade::AMinus,
        LetterGrade::BPlus,
        LetterGrade::B,
        LetterGrade::BMinus,
        LetterGrade::CPlus,
        LetterGrade::C,
        LetterGrade::CMinus,
        LetterGrade::D,
        LetterGrade::F,
        LetterGrade::Incomplete,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim();
        Self::ALL.into_iter().find(|g| g.as_str() == t)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::AMinus => "A-",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::BMinus => "B-",
            Self::CPlus => "C+",
            Self::C => "C",
            Self::CMinus => "C-",
            Self::D => "D",
            Self::F => "F",
            Self::Incomplete => "I",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M" => Some(Self::Male),
            "F" => Some(Self::Female),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

fn get_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_bool(row: &Row<'_>, idx: usize) -> rusqlite::Result<bool> {
    Ok(row.get::<_, i64>(idx)? != 0)
}

pub fn validate_year_level(year: i64) -> Result<(), ValidationError> {
    if !(1..=5).contains(&year) {
        return Err(ValidationError::new("year", "year must be between 1 and 5"));
    }
    Ok(())
}

pub fn validate_semester_number(n: i64, field: &'static str) -> Result<(), ValidationError> {
    if n != 1 && n != 2 {
        return Err(ValidationError::new(field, "semester must be 1 or 2"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Department {
    pub id: String,
    pub name: String,
    pub code: String,
    pub created_at: String,
}

impl Department {
    pub const SELECT: &'static str = "SELECT id, name, code, created_at FROM departments";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            code: r.get(2)?,
            created_at: r.get(3)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "name must not be empty"));
        }
        let code = self.code.trim();
        if code.is_empty() || code.len() > 10 {
            return Err(ValidationError::new("code", "code must be 1..=10 characters"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AcademicProgram {
    pub id: String,
    pub name: String,
    pub department_id: String,
    pub duration: i64,
}

impl AcademicProgram {
    pub const SELECT: &'static str =
        "SELECT id, name, department_id, duration FROM academic_programs";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            department_id: r.get(2)?,
            duration: r.get(3)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "name must not be empty"));
        }
        if !(1..=10).contains(&self.duration) {
            return Err(ValidationError::new(
                "duration",
                "duration must be between 1 and 10 years",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AcademicYear {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub registration_start: NaiveDate,
    pub registration_deadline: NaiveDate,
    pub late_registration_deadline: NaiveDate,
    pub is_active: bool,
}

impl AcademicYear {
    pub const SELECT: &'static str = "SELECT id, name, start_date, end_date, registration_start,
            registration_deadline, late_registration_deadline, is_active
         FROM academic_years";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            start_date: get_date(r, 2)?,
            end_date: get_date(r, 3)?,
            registration_start: get_date(r, 4)?,
            registration_deadline: get_date(r, 5)?,
            late_registration_deadline: get_date(r, 6)?,
            is_active: get_bool(r, 7)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "name must not be empty"));
        }
        if self.end_date <= self.start_date {
            return Err(ValidationError::new(
                "endDate",
                "end date must be after start date",
            ));
        }
        if self.registration_deadline <= self.registration_start {
            return Err(ValidationError::new(
                "registrationDeadline",
                "registration deadline must be after registration start",
            ));
        }
        if self.late_registration_deadline <= self.registration_deadline {
            return Err(ValidationError::new(
                "lateRegistrationDeadline",
                "late registration deadline must be after the regular deadline",
            ));
        }
        Ok(())
    }
}

pub const SEMESTER_MIN_DAYS: i64 = 90;
pub const SEMESTER_MAX_DAYS: i64 = 210;

#[derive(Debug, Clone)]
pub struct Semester {
    pub id: String,
    pub name: String,
    pub academic_year_id: String,
    pub semester_number: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
    pub registration_open: bool,
}

impl Semester {
    pub const SELECT: &'static str = "SELECT id, name, academic_year_id, semester_number,
            start_date, end_date, is_active, registration_open
         FROM semesters";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            academic_year_id: r.get(2)?,
            semester_number: r.get(3)?,
            start_date: get_date(r, 4)?,
            end_date: get_date(r, 5)?,
            is_active: get_bool(r, 6)?,
            registration_open: get_bool(r, 7)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    /// The active semester with the latest start date, if any.
    pub fn current(conn: &Connection) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!(
                "{} WHERE is_active = 1 ORDER BY start_date DESC LIMIT 1",
                Self::SELECT
            ),
            [],
            Self::from_row,
        )
        .optional()
    }

    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "name must not be empty"));
        }
        validate_semester_number(self.semester_number, "semesterNumber")?;
        if self.end_date <= self.start_date {
            return Err(ValidationError::new(
                "endDate",
                "end date must be after start date",
            ));
        }
        let days = self.duration_days();
        if days < SEMESTER_MIN_DAYS {
            return Err(ValidationError::new(
                "endDate",
                format!(
                    "semester must be at least {} days long (current duration: {} days)",
                    SEMESTER_MIN_DAYS, days
                ),
            ));
        }
        if days > SEMESTER_MAX_DAYS {
            return Err(ValidationError::new(
                "endDate",
                format!(
                    "semester cannot be longer than {} days (current duration: {} days)",
                    SEMESTER_MAX_DAYS, days
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub user_id: Option<String>,
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub gender: String,
    pub department_id: String,
    pub program_id: String,
    pub year: i64,
    pub registration_date: String,
    pub is_active: bool,
}

impl Student {
    pub const SELECT: &'static str = "SELECT s.id, s.user_id, s.student_id, s.first_name,
            s.last_name, s.email, s.phone, s.gender, s.department_id, s.program_id, s.year,
            s.registration_date, s.is_active
         FROM students s";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            user_id: r.get(1)?,
            student_id: r.get(2)?,
            first_name: r.get(3)?,
            last_name: r.get(4)?,
            email: r.get(5)?,
            phone: r.get(6)?,
            gender: r.get(7)?,
            department_id: r.get(8)?,
            program_id: r.get(9)?,
            year: r.get(10)?,
            registration_date: r.get(11)?,
            is_active: get_bool(r, 12)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE s.id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn load_for_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("{} WHERE s.user_id = ?", Self::SELECT),
            [user_id],
            Self::from_row,
        )
        .optional()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.student_id.trim().is_empty() {
            return Err(ValidationError::new("studentId", "student id must not be empty"));
        }
        if self.first_name.trim().is_empty() {
            return Err(ValidationError::new("firstName", "first name must not be empty"));
        }
        if self.last_name.trim().is_empty() {
            return Err(ValidationError::new("lastName", "last name must not be empty"));
        }
        if !self.email.contains('@') {
            return Err(ValidationError::new("email", "email must be a valid address"));
        }
        if Gender::parse(&self.gender).is_none() {
            return Err(ValidationError::new("gender", "gender must be M or F"));
        }
        validate_year_level(self.year)
    }
}

pub const MAX_COURSE_CREDITS: i64 = 12;

#[derive(Debug, Clone)]
pub struct Course {
    pub id: String,
    pub code: String,
    pub name: String,
    pub credits: i64,
    pub department_id: String,
    pub semester: i64,
    pub year: i64,
    pub instructor_id: Option<String>,
    pub is_active: bool,
}

impl Course {
    pub const SELECT: &'static str = "SELECT c.id, c.code, c.name, c.credits, c.department_id,
            c.semester, c.year, c.instructor_id, c.is_active
         FROM courses c";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            code: r.get(1)?,
            name: r.get(2)?,
            credits: r.get(3)?,
            department_id: r.get(4)?,
            semester: r.get(5)?,
            year: r.get(6)?,
            instructor_id: r.get(7)?,
            is_active: get_bool(r, 8)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE c.id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn display_name(&self) -> String {
        format!("{} - {}", self.code, self.name)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.code.trim().is_empty() || self.code.len() > 20 {
            return Err(ValidationError::new("code", "code must be 1..=20 characters"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "name must not be empty"));
        }
        if !(1..=MAX_COURSE_CREDITS).contains(&self.credits) {
            return Err(ValidationError::new(
                "credits",
                format!("credits must be between 1 and {}", MAX_COURSE_CREDITS),
            ));
        }
        validate_semester_number(self.semester, "semester")?;
        validate_year_level(self.year)
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationPenalty {
    pub id: String,
    pub academic_year_id: String,
    pub penalty_amount: f64,
    pub description: String,
    pub is_active: bool,
}

impl RegistrationPenalty {
    pub const SELECT: &'static str = "SELECT id, academic_year_id, penalty_amount, description,
            is_active
         FROM registration_penalties";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            academic_year_id: r.get(1)?,
            penalty_amount: r.get(2)?,
            description: r.get(3)?,
            is_active: get_bool(r, 4)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.penalty_amount.is_finite() || self.penalty_amount < 0.0 {
            return Err(ValidationError::new(
                "penaltyAmount",
                "penalty amount must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Courses attached to a registration or slip through a join table.
fn linked_courses(
    conn: &Connection,
    link_table: &str,
    owner_col: &str,
    owner_id: &str,
) -> rusqlite::Result<Vec<Course>> {
    let sql = format!(
        "{} JOIN {link_table} l ON l.course_id = c.id WHERE l.{owner_col} = ? ORDER BY c.code",
        Course::SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([owner_id], Course::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn total_credits(courses: &[Course]) -> i64 {
    courses.iter().map(|c| c.credits).sum()
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub id: String,
    pub student_id: String,
    pub semester_id: String,
    pub academic_year_id: String,
    pub registered_at: String,
    pub is_approved: bool,
    pub approved_by: Option<String>,
    pub is_late_registration: bool,
    pub penalty_paid: bool,
    pub penalty_amount: f64,
    pub registration_type: RegistrationType,
}

impl Registration {
    pub const SELECT: &'static str = "SELECT r.id, r.student_id, r.semester_id,
            r.academic_year_id, r.registered_at, r.is_approved, r.approved_by,
            r.is_late_registration, r.penalty_paid, r.penalty_amount, r.registration_type
         FROM registrations r";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = r.get(10)?;
        Ok(Self {
            id: r.get(0)?,
            student_id: r.get(1)?,
            semester_id: r.get(2)?,
            academic_year_id: r.get(3)?,
            registered_at: r.get(4)?,
            is_approved: get_bool(r, 5)?,
            approved_by: r.get(6)?,
            is_late_registration: get_bool(r, 7)?,
            penalty_paid: get_bool(r, 8)?,
            penalty_amount: r.get(9)?,
            registration_type: RegistrationType::parse(&kind).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    10,
                    Type::Text,
                    format!("unknown registration type: {}", kind).into(),
                )
            })?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE r.id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn courses(&self, conn: &Connection) -> rusqlite::Result<Vec<Course>> {
        linked_courses(conn, "registration_courses", "registration_id", &self.id)
    }
}

#[derive(Debug, Clone)]
pub struct Grade {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub semester_id: String,
    pub grade: LetterGrade,
    pub entered_by: Option<String>,
    pub entered_at: String,
    pub is_published: bool,
    pub published_by: Option<String>,
    pub published_at: Option<String>,
}

impl Grade {
    pub const SELECT: &'static str = "SELECT g.id, g.student_id, g.course_id, g.semester_id,
            g.grade, g.entered_by, g.entered_at, g.is_published, g.published_by, g.published_at
         FROM grades g";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let letter: String = r.get(4)?;
        let grade = LetterGrade::parse(&letter).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown letter grade: {}", letter).into(),
            )
        })?;
        Ok(Self {
            id: r.get(0)?,
            student_id: r.get(1)?,
            course_id: r.get(2)?,
            semester_id: r.get(3)?,
            grade,
            entered_by: r.get(5)?,
            entered_at: r.get(6)?,
            is_published: get_bool(r, 7)?,
            published_by: r.get(8)?,
            published_at: r.get(9)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE g.id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    /// Numeric points, always derived from the letter grade.
    pub fn points(&self) -> Option<f64> {
        crate::rules::grade_points(self.grade)
    }
}

#[derive(Debug, Clone)]
pub struct CourseSlip {
    pub id: String,
    pub student_id: String,
    pub semester_id: String,
    pub academic_year_id: String,
    pub assigned_by: Option<String>,
    pub assigned_date: String,
    pub is_approved: bool,
    pub approved_by: Option<String>,
}

impl CourseSlip {
    pub const SELECT: &'static str = "SELECT cs.id, cs.student_id, cs.semester_id,
            cs.academic_year_id, cs.assigned_by, cs.assigned_date, cs.is_approved, cs.approved_by
         FROM course_slips cs";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            student_id: r.get(1)?,
            semester_id: r.get(2)?,
            academic_year_id: r.get(3)?,
            assigned_by: r.get(4)?,
            assigned_date: r.get(5)?,
            is_approved: get_bool(r, 6)?,
            approved_by: r.get(7)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE cs.id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn find(
        conn: &Connection,
        student_id: &str,
        semester_id: &str,
        academic_year_id: &str,
    ) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!(
                "{} WHERE cs.student_id = ? AND cs.semester_id = ? AND cs.academic_year_id = ?",
                Self::SELECT
            ),
            (student_id, semester_id, academic_year_id),
            Self::from_row,
        )
        .optional()
    }

    pub fn courses(&self, conn: &Connection) -> rusqlite::Result<Vec<Course>> {
        linked_courses(conn, "course_slip_courses", "course_slip_id", &self.id)
    }
}

#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub role: Option<Role>,
    pub department_id: Option<String>,
}

impl UserAccount {
    pub const SELECT: &'static str = "SELECT u.id, u.username, u.email, u.first_name,
            u.last_name, u.is_active, ur.role, ur.department_id
         FROM users u
         LEFT JOIN user_roles ur ON ur.user_id = u.id";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let role: Option<String> = r.get(6)?;
        Ok(Self {
            id: r.get(0)?,
            username: r.get(1)?,
            email: r.get(2)?,
            first_name: r.get(3)?,
            last_name: r.get(4)?,
            is_active: get_bool(r, 5)?,
            role: role.as_deref().and_then(Role::parse),
            department_id: r.get(7)?,
        })
    }

    pub fn load(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(&format!("{} WHERE u.id = ?", Self::SELECT), [id], Self::from_row)
            .optional()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
