//! Role-keyed access policy.
//!
//! Every role maps to a fixed [`Capabilities`] value: which slice of each
//! collection it may read, and which mutating actions it may perform. Handlers
//! ask the caller for a [`Filter`] when listing and call [`Caller::require`]
//! before mutating; they never branch on the role themselves.

use crate::domain::{Role, Student};
use rusqlite::types::Value;
use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    OwnStudent,
    Department,
    Instructor,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ManageCatalog,
    ManageStudents,
    ManageUsers,
    SelfRegister,
    AssignRegistration,
    ApproveRegistration,
    PayPenalty,
    EnterGrade,
    PublishGrade,
    AssignCourses,
    ApproveCourseSlip,
    AutoAssignCourses,
    ViewRegistrarReports,
    ViewDepartmentReports,
    ConfigureSystem,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManageCatalog => "manage the catalog",
            Self::ManageStudents => "manage students",
            Self::ManageUsers => "manage user accounts",
            Self::SelfRegister => "self-register",
            Self::AssignRegistration => "assign registrations",
            Self::ApproveRegistration => "approve registrations",
            Self::PayPenalty => "pay registration penalties",
            Self::EnterGrade => "enter grades",
            Self::PublishGrade => "publish grades",
            Self::AssignCourses => "assign courses",
            Self::ApproveCourseSlip => "approve course slips",
            Self::AutoAssignCourses => "auto-assign courses",
            Self::ViewRegistrarReports => "view registrar reports",
            Self::ViewDepartmentReports => "view department reports",
            Self::ConfigureSystem => "configure the system",
        }
    }
}

/// Collections a scope can be applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Students,
    Courses,
    Registrations,
    CourseSlips,
    Grades,
}

#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub students: Scope,
    pub courses: Scope,
    pub records: Scope,
    pub grades: Scope,
    pub published_grades_only: bool,
    pub actions: &'static [Action],
}

const STUDENT_ACTIONS: &[Action] = &[Action::SelfRegister, Action::PayPenalty];
const INSTRUCTOR_ACTIONS: &[Action] = &[Action::EnterGrade, Action::PublishGrade];
const DEPARTMENT_HEAD_ACTIONS: &[Action] = &[
    Action::EnterGrade,
    Action::PublishGrade,
    Action::AssignCourses,
    Action::ApproveCourseSlip,
    Action::ViewDepartmentReports,
];
const REGISTRAR_ACTIONS: &[Action] = &[
    Action::ManageCatalog,
    Action::ManageStudents,
    Action::AssignRegistration,
    Action::ApproveRegistration,
    Action::PayPenalty,
    Action::AssignCourses,
    Action::ApproveCourseSlip,
    Action::AutoAssignCourses,
    Action::ViewRegistrarReports,
];
const ADMINISTRATOR_ACTIONS: &[Action] = &[
    Action::ManageCatalog,
    Action::ManageStudents,
    Action::ManageUsers,
    Action::AssignRegistration,
    Action::ApproveRegistration,
    Action::PayPenalty,
    Action::AssignCourses,
    Action::ApproveCourseSlip,
    Action::AutoAssignCourses,
    Action::ViewRegistrarReports,
    Action::ConfigureSystem,
];

pub fn capabilities(role: Role) -> Capabilities {
    match role {
        Role::Student => Capabilities {
            students: Scope::OwnStudent,
            courses: Scope::All,
            records: Scope::OwnStudent,
            grades: Scope::OwnStudent,
            published_grades_only: true,
            actions: STUDENT_ACTIONS,
        },
        Role::Instructor => Capabilities {
            students: Scope::Department,
            courses: Scope::Instructor,
            records: Scope::Instructor,
            grades: Scope::Instructor,
            published_grades_only: false,
            actions: INSTRUCTOR_ACTIONS,
        },
        Role::DepartmentHead => Capabilities {
            students: Scope::Department,
            courses: Scope::Department,
            records: Scope::Department,
            grades: Scope::Department,
            published_grades_only: false,
            actions: DEPARTMENT_HEAD_ACTIONS,
        },
        Role::Registrar => Capabilities {
            students: Scope::All,
            courses: Scope::All,
            records: Scope::All,
            grades: Scope::All,
            published_grades_only: false,
            actions: REGISTRAR_ACTIONS,
        },
        Role::Administrator => Capabilities {
            students: Scope::All,
            courses: Scope::All,
            records: Scope::All,
            grades: Scope::All,
            published_grades_only: false,
            actions: ADMINISTRATOR_ACTIONS,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("login required")]
    Unauthenticated,
    #[error("permission denied: {role} may not {action}")]
    Forbidden {
        role: &'static str,
        action: &'static str,
    },
    #[error("permission denied: {0}")]
    OutOfScope(String),
}

/// SQL predicate plus its bound parameters, ready to be appended to a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub clause: String,
    pub params: Vec<Value>,
}

impl Filter {
    fn new(clause: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            clause: clause.into(),
            params,
        }
    }

    fn deny() -> Self {
        Self::new("0", Vec::new())
    }

    fn allow() -> Self {
        Self::new("1", Vec::new())
    }
}

/// The authenticated principal behind a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub department_id: Option<String>,
    /// `students.id` of the linked student record, for student accounts.
    pub student_id: Option<String>,
}

impl Caller {
    pub fn capabilities(&self) -> Capabilities {
        capabilities(self.role)
    }

    pub fn can(&self, action: Action) -> bool {
        self.capabilities().actions.contains(&action)
    }

    pub fn require(&self, action: Action) -> Result<(), PolicyError> {
        if self.can(action) {
            Ok(())
        } else {
            Err(PolicyError::Forbidden {
                role: self.role.as_str(),
                action: action.as_str(),
            })
        }
    }

    pub fn scope_for(&self, target: Target) -> Scope {
        let caps = self.capabilities();
        match target {
            Target::Students => caps.students,
            Target::Courses => caps.courses,
            Target::Registrations | Target::CourseSlips => caps.records,
            Target::Grades => caps.grades,
        }
    }

    /// Predicate over the conventional alias of `target`
    /// (`s` students, `c` courses, `r` registrations, `cs` course slips, `g` grades).
    pub fn filter(&self, target: Target) -> Filter {
        let scope = self.scope_for(target);
        let base = match scope {
            Scope::All => Filter::allow(),
            Scope::OwnStudent => match &self.student_id {
                None => Filter::deny(),
                Some(sid) => {
                    let col = match target {
                        Target::Students => "s.id = ?",
                        Target::Courses => return Filter::allow(),
                        Target::Registrations => "r.student_id = ?",
                        Target::CourseSlips => "cs.student_id = ?",
                        Target::Grades => "g.student_id = ?",
                    };
                    Filter::new(col, vec![Value::Text(sid.clone())])
                }
            },
            Scope::Department => match &self.department_id {
                None => Filter::deny(),
                Some(dept) => {
                    let clause = match target {
                        Target::Students => "s.department_id = ?",
                        Target::Courses => "c.department_id = ?",
                        Target::Registrations => {
                            "r.student_id IN (SELECT id FROM students WHERE department_id = ?)"
                        }
                        Target::CourseSlips => {
                            "cs.student_id IN (SELECT id FROM students WHERE department_id = ?)"
                        }
                        Target::Grades => {
                            "g.course_id IN (SELECT id FROM courses WHERE department_id = ?)"
                        }
                    };
                    Filter::new(clause, vec![Value::Text(dept.clone())])
                }
            },
            Scope::Instructor => {
                let uid = Value::Text(self.user_id.clone());
                match target {
                    Target::Students => Filter::deny(),
                    Target::Courses => Filter::new("c.instructor_id = ?", vec![uid]),
                    Target::Registrations => Filter::new(
                        "r.id IN (SELECT rc.registration_id FROM registration_courses rc
                                  JOIN courses ic ON ic.id = rc.course_id
                                  WHERE ic.instructor_id = ?)",
                        vec![uid],
                    ),
                    Target::CourseSlips => Filter::new(
                        "cs.id IN (SELECT csc.course_slip_id FROM course_slip_courses csc
                                   JOIN courses ic ON ic.id = csc.course_id
                                   WHERE ic.instructor_id = ?)",
                        vec![uid],
                    ),
                    Target::Grades => Filter::new(
                        "(g.course_id IN (SELECT id FROM courses WHERE instructor_id = ?)
                          OR g.entered_by = ?)",
                        vec![uid.clone(), uid],
                    ),
                }
            }
        };
        if target == Target::Grades && self.capabilities().published_grades_only {
            return Filter::new(
                format!("({}) AND g.is_published = 1", base.clause),
                base.params,
            );
        }
        base
    }

    /// Whether a single row of `target` falls inside the caller's scope.
    pub fn can_see(&self, conn: &Connection, target: Target, id: &str) -> rusqlite::Result<bool> {
        let (table, alias) = match target {
            Target::Students => ("students", "s"),
            Target::Courses => ("courses", "c"),
            Target::Registrations => ("registrations", "r"),
            Target::CourseSlips => ("course_slips", "cs"),
            Target::Grades => ("grades", "g"),
        };
        let f = self.filter(target);
        let sql = format!(
            "SELECT COUNT(*) FROM {table} {alias} WHERE {alias}.id = ? AND ({})",
            f.clause
        );
        let mut params: Vec<Value> = vec![Value::Text(id.to_string())];
        params.extend(f.params);
        let n: i64 = conn.query_row(&sql, rusqlite::params_from_iter(params), |r| r.get(0))?;
        Ok(n > 0)
    }

    /// Department-scoped roles may only act on students of their own department.
    pub fn require_student_in_scope(&self, student: &Student) -> Result<(), PolicyError> {
        let ok = match self.scope_for(Target::Students) {
            Scope::All => true,
            Scope::Instructor => false,
            Scope::OwnStudent => self.student_id.as_deref() == Some(student.id.as_str()),
            Scope::Department => self.department_id.as_deref() == Some(student.department_id.as_str()),
        };
        if ok {
            Ok(())
        } else {
            Err(PolicyError::OutOfScope(format!(
                "student {} is outside your scope",
                student.student_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role) -> Caller {
        Caller {
            user_id: "u1".into(),
            username: "someone".into(),
            role,
            department_id: Some("cs".into()),
            student_id: if role == Role::Student {
                Some("st1".into())
            } else {
                None
            },
        }
    }

    #[test]
    fn allow_lists_are_explicit() {
        assert!(caller(Role::Registrar).can(Action::ApproveRegistration));
        assert!(caller(Role::Administrator).can(Action::ApproveRegistration));
        assert!(!caller(Role::DepartmentHead).can(Action::ApproveRegistration));
        assert!(!caller(Role::Student).can(Action::ApproveRegistration));
        assert!(caller(Role::Instructor).can(Action::PublishGrade));
        assert!(!caller(Role::Registrar).can(Action::PublishGrade));
        assert!(caller(Role::DepartmentHead).can(Action::AssignCourses));
        assert!(!caller(Role::Instructor).can(Action::AssignCourses));
        assert!(caller(Role::Administrator).can(Action::ConfigureSystem));
        assert!(!caller(Role::Registrar).can(Action::ConfigureSystem));
    }

    #[test]
    fn require_reports_role_and_action() {
        let e = caller(Role::Student).require(Action::ApproveRegistration).unwrap_err();
        assert_eq!(
            e,
            PolicyError::Forbidden {
                role: "student",
                action: "approve registrations"
            }
        );
    }

    #[test]
    fn student_sees_only_own_published_grades() {
        let f = caller(Role::Student).filter(Target::Grades);
        assert_eq!(f.clause, "(g.student_id = ?) AND g.is_published = 1");
        assert_eq!(f.params, vec![Value::Text("st1".into())]);
    }

    #[test]
    fn department_scope_binds_department() {
        let f = caller(Role::DepartmentHead).filter(Target::Students);
        assert_eq!(f.clause, "s.department_id = ?");
        assert_eq!(f.params, vec![Value::Text("cs".into())]);
    }

    #[test]
    fn missing_link_denies_everything() {
        let mut c = caller(Role::DepartmentHead);
        c.department_id = None;
        assert_eq!(c.filter(Target::Registrations).clause, "0");
        let mut s = caller(Role::Student);
        s.student_id = None;
        assert_eq!(s.filter(Target::Registrations).clause, "0");
    }

    #[test]
    fn registrar_sees_all() {
        for t in [
            Target::Students,
            Target::Courses,
            Target::Registrations,
            Target::CourseSlips,
            Target::Grades,
        ] {
            assert_eq!(caller(Role::Registrar).filter(t).clause, "1");
        }
    }

    #[test]
    fn instructor_grade_scope_covers_entered_grades() {
        let f = caller(Role::Instructor).filter(Target::Grades);
        assert!(f.clause.contains("g.entered_by = ?"));
        assert_eq!(f.params.len(), 2);
    }
}
