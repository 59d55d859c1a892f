use super::setup;
use crate::db;
use crate::domain::{AcademicYear, RegistrationPenalty, Semester, DATE_FORMAT};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    bool_to_sql, ensure_unreferenced, get_optional_bool, get_optional_date, get_optional_f64,
    get_optional_i64, get_optional_str, get_required_date, get_required_f64, get_required_i64,
    get_required_str, load_or_not_found, new_id, query_rows, run_authed, run_open, today,
    Conditions, Op,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller};
use crate::present;
use crate::rules;
use rusqlite::Connection;
use serde_json::{json, Value};

fn date_sql(d: chrono::NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

// Academic years

fn years_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    if let Some(active) = get_optional_bool(params, "active")? {
        conds.push("is_active = ?", vec![bool_to_sql(active).into()]);
    }
    let sql = format!("{}{} ORDER BY start_date DESC", AcademicYear::SELECT, conds.where_sql());
    let rows = query_rows(conn, &sql, &conds, AcademicYear::from_row)?;
    let today = today();
    Ok(json!({
        "academicYears": rows.iter().map(|y| present::academic_year(y, today)).collect::<Vec<_>>()
    }))
}

fn apply_year_params(year: &mut AcademicYear, params: &Value) -> Result<(), HandlerErr> {
    if let Some(name) = get_optional_str(params, "name")? {
        year.name = name;
    }
    if let Some(d) = get_optional_date(params, "startDate")? {
        year.start_date = d;
    }
    if let Some(d) = get_optional_date(params, "endDate")? {
        year.end_date = d;
    }
    if let Some(d) = get_optional_date(params, "registrationStart")? {
        year.registration_start = d;
    }
    if let Some(d) = get_optional_date(params, "registrationDeadline")? {
        year.registration_deadline = d;
    }
    if let Some(d) = get_optional_date(params, "lateRegistrationDeadline")? {
        year.late_registration_deadline = d;
    }
    if let Some(active) = get_optional_bool(params, "isActive")? {
        year.is_active = active;
    }
    Ok(())
}

fn save_year(conn: &Connection, year: &AcademicYear, insert: bool) -> Result<(), HandlerErr> {
    let sql = if insert {
        "INSERT INTO academic_years(name, start_date, end_date, registration_start,
            registration_deadline, late_registration_deadline, is_active, id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)"
    } else {
        "UPDATE academic_years SET name = ?, start_date = ?, end_date = ?,
            registration_start = ?, registration_deadline = ?,
            late_registration_deadline = ?, is_active = ?
         WHERE id = ?"
    };
    conn.execute(
        sql,
        (
            &year.name,
            date_sql(year.start_date),
            date_sql(year.end_date),
            date_sql(year.registration_start),
            date_sql(year.registration_deadline),
            date_sql(year.late_registration_deadline),
            bool_to_sql(year.is_active),
            &year.id,
        ),
    )?;
    Ok(())
}

fn years_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let mut year = AcademicYear {
        id: new_id(),
        name: get_required_str(params, "name")?,
        start_date: get_required_date(params, "startDate")?,
        end_date: get_required_date(params, "endDate")?,
        registration_start: get_required_date(params, "registrationStart")?,
        registration_deadline: get_required_date(params, "registrationDeadline")?,
        late_registration_deadline: get_required_date(params, "lateRegistrationDeadline")?,
        is_active: false,
    };
    apply_year_params(&mut year, params)?;
    year.validate()?;
    save_year(conn, &year, true)?;
    Ok(json!({ "academicYear": present::academic_year(&year, today()) }))
}

fn years_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "academicYearId")?;
    let mut year = load_or_not_found(AcademicYear::load(conn, &id), "academic year")?;
    apply_year_params(&mut year, params)?;
    year.validate()?;
    save_year(conn, &year, false)?;
    Ok(json!({ "academicYear": present::academic_year(&year, today()) }))
}

fn years_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "academicYearId")?;
    let n = conn.execute("DELETE FROM academic_years WHERE id = ?", [&id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("academic year"));
    }
    Ok(json!({ "deleted": true }))
}

fn penalty_for(conn: &Connection, year: &AcademicYear) -> Result<f64, HandlerErr> {
    let fallback = setup::registration_config(conn)?.default_penalty_amount;
    let amount = rules::active_penalty_amount(conn, &year.id)?.unwrap_or(fallback);
    Ok(rules::round2(amount))
}

fn year_status_json(conn: &Connection, year: &AcademicYear) -> Result<Value, HandlerErr> {
    let today = today();
    Ok(json!({
        "academicYearId": year.id,
        "academicYear": year.name,
        "status": rules::registration_status(year, today).as_str(),
        "registrationStart": date_sql(year.registration_start),
        "registrationDeadline": date_sql(year.registration_deadline),
        "lateRegistrationDeadline": date_sql(year.late_registration_deadline),
        "currentDate": date_sql(today),
        "penaltyAmount": penalty_for(conn, year)?,
        "isActive": year.is_active,
    }))
}

fn years_registration_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "academicYearId")?;
    let year = load_or_not_found(AcademicYear::load(conn, &id), "academic year")?;
    year_status_json(conn, &year)
}

fn years_status_all(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let conds = Conditions::new();
    let sql = format!("{} ORDER BY start_date DESC", AcademicYear::SELECT);
    let years = query_rows(conn, &sql, &conds, AcademicYear::from_row)?;
    let statuses = years
        .iter()
        .map(|y| year_status_json(conn, y))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "academicYears": statuses }))
}

// Semesters

fn semesters_list(conn: &Connection, _caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    conds.push_eq("academic_year_id", get_optional_str(params, "academicYearId")?);
    if let Some(active) = get_optional_bool(params, "active")? {
        conds.push("is_active = ?", vec![bool_to_sql(active).into()]);
    }
    let sql = format!("{}{} ORDER BY start_date", Semester::SELECT, conds.where_sql());
    let rows = query_rows(conn, &sql, &conds, Semester::from_row)?;
    let semesters = rows
        .iter()
        .map(|s| present::semester(conn, s))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "semesters": semesters }))
}

fn save_semester(conn: &Connection, s: &Semester, insert: bool) -> Result<(), HandlerErr> {
    let sql = if insert {
        "INSERT INTO semesters(name, academic_year_id, semester_number, start_date, end_date,
            is_active, registration_open, id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)"
    } else {
        "UPDATE semesters SET name = ?, academic_year_id = ?, semester_number = ?,
            start_date = ?, end_date = ?, is_active = ?, registration_open = ?
         WHERE id = ?"
    };
    conn.execute(
        sql,
        (
            &s.name,
            &s.academic_year_id,
            s.semester_number,
            date_sql(s.start_date),
            date_sql(s.end_date),
            bool_to_sql(s.is_active),
            bool_to_sql(s.registration_open),
            &s.id,
        ),
    )?;
    Ok(())
}

fn semesters_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let semester = Semester {
        id: new_id(),
        name: get_required_str(params, "name")?,
        academic_year_id: get_required_str(params, "academicYearId")?,
        semester_number: get_required_i64(params, "semesterNumber")?,
        start_date: get_required_date(params, "startDate")?,
        end_date: get_required_date(params, "endDate")?,
        is_active: get_optional_bool(params, "isActive")?.unwrap_or(false),
        registration_open: get_optional_bool(params, "registrationOpen")?.unwrap_or(false),
    };
    semester.validate()?;
    load_or_not_found(AcademicYear::load(conn, &semester.academic_year_id), "academic year")?;
    save_semester(conn, &semester, true)?;
    Ok(json!({ "semester": present::semester(conn, &semester)? }))
}

const SEMESTER_HISTORY: &[(&str, &str)] = &[
    ("grades", "semester_id"),
    ("registrations", "semester_id"),
    ("course_slips", "semester_id"),
];

fn semesters_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "semesterId")?;
    let mut s = load_or_not_found(Semester::load(conn, &id), "semester")?;
    if let Some(name) = get_optional_str(params, "name")? {
        s.name = name;
    }
    if let Some(year_id) = get_optional_str(params, "academicYearId")? {
        load_or_not_found(AcademicYear::load(conn, &year_id), "academic year")?;
        if year_id != s.academic_year_id {
            // Registrations and slips carry the year too; moving would split them.
            ensure_unreferenced(conn, &s.id, SEMESTER_HISTORY, "semester")?;
        }
        s.academic_year_id = year_id;
    }
    if let Some(n) = get_optional_i64(params, "semesterNumber")? {
        s.semester_number = n;
    }
    if let Some(d) = get_optional_date(params, "startDate")? {
        s.start_date = d;
    }
    if let Some(d) = get_optional_date(params, "endDate")? {
        s.end_date = d;
    }
    if let Some(b) = get_optional_bool(params, "isActive")? {
        s.is_active = b;
    }
    if let Some(b) = get_optional_bool(params, "registrationOpen")? {
        s.registration_open = b;
    }
    s.validate()?;
    save_semester(conn, &s, false)?;
    Ok(json!({ "semester": present::semester(conn, &s)? }))
}

fn semesters_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "semesterId")?;
    ensure_unreferenced(conn, &id, SEMESTER_HISTORY, "semester")?;
    let n = conn.execute("DELETE FROM semesters WHERE id = ?", [&id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("semester"));
    }
    Ok(json!({ "deleted": true }))
}

// Penalties

fn penalties_list(conn: &Connection, _caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    let mut conds = Conditions::new();
    conds.push_eq("academic_year_id", get_optional_str(params, "academicYearId")?);
    let sql = format!("{}{} ORDER BY created_at, rowid", RegistrationPenalty::SELECT, conds.where_sql());
    let rows = query_rows(conn, &sql, &conds, RegistrationPenalty::from_row)?;
    let penalties = rows
        .iter()
        .map(|p| present::penalty(conn, p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "penalties": penalties }))
}

fn penalties_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let p = RegistrationPenalty {
        id: new_id(),
        academic_year_id: get_required_str(params, "academicYearId")?,
        penalty_amount: get_required_f64(params, "penaltyAmount")?,
        description: get_optional_str(params, "description")?.unwrap_or_default(),
        is_active: get_optional_bool(params, "isActive")?.unwrap_or(true),
    };
    p.validate()?;
    load_or_not_found(AcademicYear::load(conn, &p.academic_year_id), "academic year")?;
    conn.execute(
        "INSERT INTO registration_penalties(id, academic_year_id, penalty_amount, description,
            is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &p.id,
            &p.academic_year_id,
            rules::round2(p.penalty_amount),
            &p.description,
            bool_to_sql(p.is_active),
            db::now_timestamp(),
        ),
    )?;
    Ok(json!({ "penalty": present::penalty(conn, &p)? }))
}

fn penalties_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "penaltyId")?;
    let mut p = load_or_not_found(RegistrationPenalty::load(conn, &id), "penalty")?;
    if let Some(amount) = get_optional_f64(params, "penaltyAmount")? {
        p.penalty_amount = amount;
    }
    if let Some(desc) = get_optional_str(params, "description")? {
        p.description = desc;
    }
    if let Some(b) = get_optional_bool(params, "isActive")? {
        p.is_active = b;
    }
    p.validate()?;
    conn.execute(
        "UPDATE registration_penalties SET penalty_amount = ?, description = ?, is_active = ?
         WHERE id = ?",
        (
            rules::round2(p.penalty_amount),
            &p.description,
            bool_to_sql(p.is_active),
            &p.id,
        ),
    )?;
    Ok(json!({ "penalty": present::penalty(conn, &p)? }))
}

fn penalties_delete(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageCatalog)?;
    let id = get_required_str(params, "penaltyId")?;
    let n = conn.execute("DELETE FROM registration_penalties WHERE id = ?", [&id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("penalty"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "academicYears.list" => return Some(run_open(state, req, years_list)),
        "academicYears.registrationStatus" => {
            return Some(run_open(state, req, years_registration_status))
        }
        "academicYears.statusAll" => return Some(run_open(state, req, years_status_all)),
        _ => {}
    }
    let op: Op = match req.method.as_str() {
        "academicYears.create" => years_create,
        "academicYears.update" => years_update,
        "academicYears.delete" => years_delete,
        "semesters.list" => semesters_list,
        "semesters.create" => semesters_create,
        "semesters.update" => semesters_update,
        "semesters.delete" => semesters_delete,
        "penalties.list" => penalties_list,
        "penalties.create" => penalties_create,
        "penalties.update" => penalties_update,
        "penalties.delete" => penalties_delete,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
