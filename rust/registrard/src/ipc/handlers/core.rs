use crate::auth::{self, NewAccount};
use crate::db;
use crate::domain::Role;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_required_password, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "loggedIn": state.session.is_some()
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(workspace = %path.display(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // A session never carries over to another workspace.
            state.session = None;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            tracing::error!(workspace = %path.display(), error = ?e, "workspace open failed");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

fn bootstrap_admin(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_roles WHERE role = ?",
        [Role::Administrator.as_str()],
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Err(HandlerErr::conflict("an administrator account already exists"));
    }
    let account = NewAccount {
        username: get_required_str(params, "username")?,
        password: get_required_password(params, "password")?,
        email: get_required_str(params, "email")?,
        first_name: get_required_str(params, "firstName")?,
        last_name: get_required_str(params, "lastName")?,
    };
    account.validate()?;

    let tx = conn.unchecked_transaction()?;
    let user_id = auth::create_account(&tx, &account, Role::Administrator, None)?;
    tx.commit()?;
    tracing::info!(username = %account.username, "administrator account bootstrapped");
    Ok(json!({ "userId": user_id, "username": account.username, "role": Role::Administrator.as_str() }))
}

fn handle_admin_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::no_workspace().response(&req.id);
    };
    match bootstrap_admin(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "admin.bootstrap" => Some(handle_admin_bootstrap(state, req)),
        _ => None,
    }
}
