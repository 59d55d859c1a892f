use crate::auth::{self, NewAccount};
use crate::domain::{Department, Role, UserAccount, ValidationError};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    bool_to_sql, get_optional_str, get_required_bool, get_required_password, get_required_str,
    get_role, load_or_not_found, query_rows, run_authed, Conditions,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller};
use crate::present;
use rusqlite::Connection;
use serde_json::{json, Value};

fn check_role_department(
    conn: &Connection,
    role: Role,
    department_id: Option<&str>,
) -> Result<(), HandlerErr> {
    if role.requires_department() && department_id.is_none() {
        return Err(ValidationError::new(
            "departmentId",
            format!("{} accounts must be linked to a department", role.label()),
        )
        .into());
    }
    if let Some(dept) = department_id {
        load_or_not_found(Department::load(conn, dept), "department")?;
    }
    Ok(())
}

fn users_list(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageUsers)?;
    let mut conds = Conditions::new();
    conds.push_eq("ur.role", get_optional_str(params, "role")?);
    conds.push_eq("ur.department_id", get_optional_str(params, "departmentId")?);
    let sql = format!("{}{} ORDER BY u.username", UserAccount::SELECT, conds.where_sql());
    let users = query_rows(conn, &sql, &conds, UserAccount::from_row)?;
    Ok(json!({ "users": users.iter().map(present::user).collect::<Vec<_>>() }))
}

fn users_create(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageUsers)?;
    let account = NewAccount {
        username: get_required_str(params, "username")?,
        password: get_required_password(params, "password")?,
        email: get_required_str(params, "email")?,
        first_name: get_required_str(params, "firstName")?,
        last_name: get_required_str(params, "lastName")?,
    };
    account.validate()?;
    let role = get_role(params, "role")?;
    let department_id = get_optional_str(params, "departmentId")?;
    check_role_department(conn, role, department_id.as_deref())?;

    let tx = conn.unchecked_transaction()?;
    let user_id = auth::create_account(&tx, &account, role, department_id.as_deref())?;
    tx.commit()?;
    tracing::info!(username = %account.username, role = role.as_str(), "user created");

    let user = load_or_not_found(UserAccount::load(conn, &user_id), "user")?;
    Ok(json!({ "user": present::user(&user) }))
}

fn users_set_role(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageUsers)?;
    let user_id = get_required_str(params, "userId")?;
    let role = get_role(params, "role")?;
    let department_id = get_optional_str(params, "departmentId")?;
    load_or_not_found(UserAccount::load(conn, &user_id), "user")?;
    check_role_department(conn, role, department_id.as_deref())?;

    auth::set_role(conn, &user_id, role, department_id.as_deref())?;
    tracing::info!(user_id = %user_id, role = role.as_str(), "role changed");
    let user = load_or_not_found(UserAccount::load(conn, &user_id), "user")?;
    Ok(json!({ "user": present::user(&user) }))
}

fn users_set_active(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ManageUsers)?;
    let user_id = get_required_str(params, "userId")?;
    let active = get_required_bool(params, "active")?;
    if !active && user_id == caller.user_id {
        return Err(HandlerErr::conflict("cannot deactivate your own account"));
    }
    let changed = conn.execute(
        "UPDATE users SET is_active = ? WHERE id = ?",
        (bool_to_sql(active), &user_id),
    )?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user"));
    }
    let user = load_or_not_found(UserAccount::load(conn, &user_id), "user")?;
    Ok(json!({ "user": present::user(&user) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: crate::ipc::helpers::Op = match req.method.as_str() {
        "users.list" => users_list,
        "users.create" => users_create,
        "users.setRole" => users_set_role,
        "users.setActive" => users_set_active,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
