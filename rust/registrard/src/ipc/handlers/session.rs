use crate::auth;
use crate::db;
use crate::domain::UserAccount;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_required_password, get_required_str, resolve_caller};
use crate::ipc::types::{AppState, Request, Session};
use crate::policy::Caller;
use rusqlite::Connection;
use serde_json::json;

fn caller_json(conn: &Connection, caller: &Caller) -> Result<serde_json::Value, HandlerErr> {
    let account = UserAccount::load(conn, &caller.user_id)?;
    let caps = caller.capabilities();
    Ok(json!({
        "userId": caller.user_id,
        "username": caller.username,
        "fullName": account.as_ref().map(|a| a.full_name()),
        "role": caller.role.as_str(),
        "roleLabel": caller.role.label(),
        "departmentId": caller.department_id,
        "studentRecordId": caller.student_id,
        "actions": caps.actions.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
    }))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::no_workspace().response(&req.id);
    };
    let username = match get_required_str(&req.params, "username") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let password = match get_required_password(&req.params, "password") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let user_id = match auth::authenticate(conn, &username, &password) {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::warn!(username = %username, "login failed");
            // Same answer for unknown user, bad password and inactive account.
            return err(&req.id, "unauthenticated", "invalid username or password", None);
        }
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };

    let session = Session {
        user_id,
        username: username.clone(),
        logged_in_at: db::now_timestamp(),
    };
    state.session = Some(session);
    let caller = match resolve_caller(state, conn) {
        Ok(c) => c,
        Err(e) => {
            state.session = None;
            return e.response(&req.id);
        }
    };
    tracing::info!(username = %username, role = caller.role.as_str(), "login");
    match caller_json(conn, &caller) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(s) = state.session.take() {
        tracing::info!(username = %s.username, "logout");
    }
    ok(&req.id, json!({ "loggedOut": true }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::no_workspace().response(&req.id);
    };
    let caller = match resolve_caller(state, conn) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let since = state.session.as_ref().map(|s| s.logged_in_at.clone());
    match caller_json(conn, &caller) {
        Ok(mut v) => {
            v["loggedInAt"] = json!(since);
            ok(&req.id, v)
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(handle_login(state, req)),
        "session.logout" => Some(handle_logout(state, req)),
        "session.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
