use crate::domain::{parse_date, Role, Student, UserAccount};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Caller, PolicyError};
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::Value;

/// A handler body that needs an open workspace and a logged-in caller.
pub type Op = fn(&Connection, &Caller, &Value) -> Result<Value, HandlerErr>;

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(trimmed.to_string())
}

/// Absent, null and blank all read as `None`; any other non-string is rejected.
pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    get_optional_i64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    get_optional_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn get_required_bool(params: &Value, key: &str) -> Result<bool, HandlerErr> {
    get_optional_bool(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    parse_date(&raw).ok_or_else(|| HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date", key)))
}

pub fn get_optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_optional_str(params, key)? {
        None => Ok(None),
        Some(raw) => parse_date(&raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date", key))),
    }
}

pub fn get_str_list(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain strings", key)))
        })
        .collect()
}

pub fn get_role(params: &Value, key: &str) -> Result<Role, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Role::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "{} must be one of: {}",
            key,
            Role::ALL.map(|r| r.as_str()).join(", ")
        ))
    })
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn bool_to_sql(b: bool) -> i64 {
    if b {
        1
    } else {
        0
    }
}

/// WHERE-clause builder for list queries with optional filters.
#[derive(Default)]
pub struct Conditions {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: impl Into<String>, params: Vec<SqlValue>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    pub fn push_eq(&mut self, column: &str, value: Option<String>) {
        if let Some(v) = value {
            self.push(format!("{} = ?", column), vec![SqlValue::Text(v)]);
        }
    }

    pub fn push_eq_i64(&mut self, column: &str, value: Option<i64>) {
        if let Some(v) = value {
            self.push(format!("{} = ?", column), vec![SqlValue::Integer(v)]);
        }
    }

    pub fn push_filter(&mut self, f: crate::policy::Filter) {
        self.push(format!("({})", f.clause), f.params);
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> rusqlite::ParamsFromIter<std::slice::Iter<'_, SqlValue>> {
        rusqlite::params_from_iter(self.params.iter())
    }
}

pub fn query_rows<T>(
    conn: &Connection,
    sql: &str,
    conds: &Conditions,
    map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, HandlerErr> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(conds.params(), map)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Resolves the session into a caller, re-reading role and scope from the workspace.
pub fn resolve_caller(state: &AppState, conn: &Connection) -> Result<Caller, HandlerErr> {
    let Some(session) = state.session.as_ref() else {
        return Err(PolicyError::Unauthenticated.into());
    };
    let Some(account) = UserAccount::load(conn, &session.user_id)? else {
        return Err(PolicyError::Unauthenticated.into());
    };
    if !account.is_active {
        return Err(PolicyError::Unauthenticated.into());
    }
    let Some(role) = account.role else {
        return Err(HandlerErr::forbidden("account has no role assigned"));
    };
    let student_id = if role == Role::Student {
        Student::load_for_user(conn, &account.id)?.map(|s| s.id)
    } else {
        None
    };
    Ok(Caller {
        user_id: account.id,
        username: account.username,
        role,
        department_id: account.department_id,
        student_id,
    })
}

pub fn run_authed(state: &AppState, req: &Request, op: Op) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::no_workspace().response(&req.id);
    };
    let caller = match resolve_caller(state, conn) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match op(conn, &caller, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

/// For the few reads that back the self-service registration form.
pub fn run_open(
    state: &AppState,
    req: &Request,
    op: fn(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::no_workspace().response(&req.id);
    };
    match op(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn load_or_not_found<T>(
    loaded: rusqlite::Result<Option<T>>,
    what: &str,
) -> Result<T, HandlerErr> {
    loaded?.ok_or_else(|| HandlerErr::not_found(what))
}

/// Fails with `conflict` when any `(table, column)` in `refs` still points at `id`.
pub fn ensure_unreferenced(
    conn: &Connection,
    id: &str,
    refs: &[(&str, &str)],
    what: &str,
) -> Result<(), HandlerErr> {
    for (table, column) in refs {
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, column),
            [id],
            |r| r.get(0),
        )?;
        if n > 0 {
            return Err(HandlerErr::conflict(format!(
                "{} is still referenced by {} {}",
                what,
                n,
                table.replace('_', " ")
            ))
            .with_details(serde_json::json!({ "table": table, "count": n })));
        }
    }
    Ok(())
}

/// Like `get_required_str` but keeps surrounding whitespace, which is part of a password.
pub fn get_required_password(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if raw.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(raw.to_string())
}

/// Loads the distinct courses named by `ids`, in request order; unknown ids are skipped.
pub fn load_courses(conn: &Connection, ids: &[String]) -> Result<Vec<crate::domain::Course>, HandlerErr> {
    let mut out: Vec<crate::domain::Course> = Vec::new();
    for id in ids {
        if out.iter().any(|c| &c.id == id) {
            continue;
        }
        if let Some(c) = crate::domain::Course::load(conn, id)? {
            out.push(c);
        }
    }
    Ok(out)
}

/// Replaces the course set behind a registration or slip. Re-running with the
/// same ids leaves the same rows.
pub fn replace_course_links(
    conn: &Connection,
    link_table: &str,
    owner_col: &str,
    owner_id: &str,
    course_ids: &[String],
) -> Result<(), HandlerErr> {
    conn.execute(
        &format!("DELETE FROM {link_table} WHERE {owner_col} = ?"),
        [owner_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "INSERT OR IGNORE INTO {link_table}({owner_col}, course_id) VALUES(?, ?)"
    ))?;
    for cid in course_ids {
        stmt.execute((owner_id, cid))?;
    }
    Ok(())
}
