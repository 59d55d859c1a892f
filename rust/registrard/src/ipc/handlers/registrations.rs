use super::setup;
use super::students::visible_student;
use crate::db;
use crate::domain::{AcademicYear, Registration, RegistrationType, Role, Semester, ValidationError};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    bool_to_sql, get_optional_bool, get_optional_str, get_required_str, get_str_list,
    load_courses, load_or_not_found, new_id, query_rows, replace_course_links, run_authed, today,
    Conditions, Op,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller, PolicyError, Target};
use crate::present;
use crate::rules;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

/// Loads a registration the caller is allowed to see.
fn visible_registration(conn: &Connection, caller: &Caller, id: &str) -> Result<Registration, HandlerErr> {
    let reg = load_or_not_found(Registration::load(conn, id), "registration")?;
    if !caller.can_see(conn, Target::Registrations, id)? {
        return Err(PolicyError::OutOfScope("registration is outside your scope".into()).into());
    }
    Ok(reg)
}

fn is_owner(caller: &Caller, reg: &Registration) -> bool {
    caller.role == Role::Student && caller.student_id.as_deref() == Some(reg.student_id.as_str())
}

fn course_ids_param(params: &Value) -> Result<Vec<String>, HandlerErr> {
    if params.get("courseIds").is_none() {
        return Ok(Vec::new());
    }
    let mut ids = get_str_list(params, "courseIds")?;
    ids.retain(|s| !s.is_empty());
    ids.dedup();
    Ok(ids)
}

/// Registration course lists only need to reference existing courses.
fn check_courses_exist(conn: &Connection, ids: &[String]) -> Result<(), HandlerErr> {
    let found = load_courses(conn, ids)?;
    let missing: Vec<&String> = ids.iter().filter(|id| !found.iter().any(|c| &c.id == *id)).collect();
    if !missing.is_empty() {
        return Err(HandlerErr::not_found("course").with_details(json!({ "courseIds": missing })));
    }
    Ok(())
}

fn registrations_list(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    conds.push_filter(caller.filter(Target::Registrations));
    conds.push_eq("r.student_id", get_optional_str(params, "studentId")?);
    conds.push_eq("r.semester_id", get_optional_str(params, "semesterId")?);
    conds.push_eq("r.academic_year_id", get_optional_str(params, "academicYearId")?);
    if let Some(approved) = get_optional_bool(params, "approved")? {
        conds.push("r.is_approved = ?", vec![bool_to_sql(approved).into()]);
    }
    if let Some(late) = get_optional_bool(params, "late")? {
        conds.push("r.is_late_registration = ?", vec![bool_to_sql(late).into()]);
    }
    let sql = format!("{}{} ORDER BY r.registered_at DESC", Registration::SELECT, conds.where_sql());
    let rows = query_rows(conn, &sql, &conds, Registration::from_row)?;
    let registrations = rows
        .iter()
        .map(|r| present::registration(conn, r))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "registrations": registrations }))
}

fn registrations_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let requested_type = match get_optional_str(params, "registrationType")? {
        Some(raw) => Some(RegistrationType::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("registrationType must be one of: student, admin")
        })?),
        None => None,
    };

    // Students register themselves; staff with the assign action register on their behalf.
    let (student_id, kind) = if caller.can(Action::SelfRegister) {
        let Some(own) = caller.student_id.clone() else {
            return Err(HandlerErr::not_found("student profile"));
        };
        if let Some(sid) = get_optional_str(params, "studentId")? {
            if sid != own {
                return Err(PolicyError::OutOfScope("students may only register themselves".into()).into());
            }
        }
        if requested_type == Some(RegistrationType::Admin) {
            caller.require(Action::AssignRegistration)?;
        }
        (own, RegistrationType::Student)
    } else {
        caller.require(Action::AssignRegistration)?;
        (
            get_required_str(params, "studentId")?,
            requested_type.unwrap_or(RegistrationType::Admin),
        )
    };

    let student = visible_student(conn, caller, &student_id)?;
    if !student.is_active {
        return Err(ValidationError::new("studentId", "student is not active").into());
    }
    let semester_id = get_required_str(params, "semesterId")?;
    let semester = load_or_not_found(Semester::load(conn, &semester_id), "semester")?;
    if let Some(year_id) = get_optional_str(params, "academicYearId")? {
        if year_id != semester.academic_year_id {
            return Err(ValidationError::new(
                "academicYearId",
                "semester does not belong to the given academic year",
            )
            .into());
        }
    }
    let year = load_or_not_found(AcademicYear::load(conn, &semester.academic_year_id), "academic year")?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM registrations
             WHERE student_id = ? AND semester_id = ? AND academic_year_id = ?",
            (&student.id, &semester.id, &year.id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing_id) = existing {
        return Err(HandlerErr::conflict("student is already registered for this semester")
            .with_details(json!({ "registrationId": existing_id })));
    }

    let config = setup::registration_config(conn)?;
    let active_penalty = rules::active_penalty_amount(conn, &year.id)?;
    let assessment = rules::assess_registration(
        &year,
        today(),
        kind,
        active_penalty,
        config.default_penalty_amount,
    )?;

    let course_ids = course_ids_param(params)?;
    check_courses_exist(conn, &course_ids)?;

    let reg = Registration {
        id: new_id(),
        student_id: student.id.clone(),
        semester_id: semester.id.clone(),
        academic_year_id: year.id.clone(),
        registered_at: db::now_timestamp(),
        is_approved: assessment.is_approved,
        approved_by: if assessment.is_approved {
            Some(caller.user_id.clone())
        } else {
            None
        },
        is_late_registration: assessment.is_late_registration,
        penalty_paid: false,
        penalty_amount: assessment.penalty_amount,
        registration_type: kind,
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO registrations(id, student_id, semester_id, academic_year_id, registered_at,
            is_approved, approved_by, is_late_registration, penalty_paid, penalty_amount,
            registration_type)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        (
            &reg.id,
            &reg.student_id,
            &reg.semester_id,
            &reg.academic_year_id,
            &reg.registered_at,
            bool_to_sql(reg.is_approved),
            &reg.approved_by,
            bool_to_sql(reg.is_late_registration),
            reg.penalty_amount,
            reg.registration_type.as_str(),
        ),
    )?;
    replace_course_links(&tx, "registration_courses", "registration_id", &reg.id, &course_ids)?;
    tx.commit()?;

    tracing::info!(
        student = %student.student_id,
        semester = %semester.name,
        kind = kind.as_str(),
        late = reg.is_late_registration,
        "registration created"
    );
    Ok(json!({ "registration": present::registration(conn, &reg)? }))
}

fn registrations_set_courses(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "registrationId")?;
    let reg = visible_registration(conn, caller, &id)?;
    if is_owner(caller, &reg) {
        if reg.is_approved {
            return Err(HandlerErr::conflict("approved registrations can no longer be changed"));
        }
    } else {
        caller.require(Action::AssignRegistration)?;
    }
    let course_ids = course_ids_param(params)?;
    check_courses_exist(conn, &course_ids)?;
    let tx = conn.unchecked_transaction()?;
    replace_course_links(&tx, "registration_courses", "registration_id", &reg.id, &course_ids)?;
    tx.commit()?;
    Ok(json!({ "registration": present::registration(conn, &reg)? }))
}

fn registrations_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "registrationId")?;
    let reg = visible_registration(conn, caller, &id)?;
    if is_owner(caller, &reg) {
        if reg.is_approved {
            return Err(HandlerErr::conflict("approved registrations can no longer be withdrawn"));
        }
    } else {
        caller.require(Action::AssignRegistration)?;
    }
    conn.execute("DELETE FROM registrations WHERE id = ?", [&reg.id])?;
    Ok(json!({ "deleted": true }))
}

fn registrations_approve(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ApproveRegistration)?;
    let id = get_required_str(params, "registrationId")?;
    let mut reg = visible_registration(conn, caller, &id)?;
    if reg.is_approved {
        return Err(HandlerErr::conflict("registration is already approved"));
    }
    conn.execute(
        "UPDATE registrations SET is_approved = 1, approved_by = ? WHERE id = ?",
        (&caller.user_id, &reg.id),
    )?;
    reg.is_approved = true;
    reg.approved_by = Some(caller.user_id.clone());
    tracing::info!(registration = %reg.id, by = %caller.username, "registration approved");
    Ok(json!({ "registration": present::registration(conn, &reg)? }))
}

fn registrations_pay_penalty(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::PayPenalty)?;
    let id = get_required_str(params, "registrationId")?;
    let mut reg = visible_registration(conn, caller, &id)?;
    if caller.role == Role::Student && !is_owner(caller, &reg) {
        return Err(PolicyError::OutOfScope("students may only pay their own penalties".into()).into());
    }
    if !reg.is_late_registration {
        return Err(ValidationError::new("registrationId", "no penalty for this registration").into());
    }
    if reg.penalty_paid {
        return Err(HandlerErr::conflict("penalty already paid"));
    }
    // Settling the penalty completes a late registration.
    let approver = if caller.can(Action::ApproveRegistration) {
        Some(caller.user_id.clone())
    } else {
        reg.approved_by.clone()
    };
    conn.execute(
        "UPDATE registrations SET penalty_paid = 1, is_approved = 1, approved_by = ? WHERE id = ?",
        (&approver, &reg.id),
    )?;
    reg.penalty_paid = true;
    reg.is_approved = true;
    reg.approved_by = approver;
    tracing::info!(registration = %reg.id, amount = reg.penalty_amount, "late penalty paid");
    Ok(json!({
        "registration": present::registration(conn, &reg)?,
        "amountPaid": rules::round2(reg.penalty_amount)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: Op = match req.method.as_str() {
        "registrations.list" => registrations_list,
        "registrations.create" => registrations_create,
        "registrations.setCourses" => registrations_set_courses,
        "registrations.delete" => registrations_delete,
        "registrations.approve" => registrations_approve,
        "registrations.payPenalty" => registrations_pay_penalty,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
