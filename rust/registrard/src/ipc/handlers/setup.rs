use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{run_authed, Op};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Action, Caller};
use crate::rules::{DEFAULT_MAX_SLIP_CREDITS, DEFAULT_PENALTY_AMOUNT};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Registration,
    Analytics,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::Registration, SetupSection::Analytics];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "registration" => Some(Self::Registration),
            "analytics" => Some(Self::Analytics),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Analytics => "analytics",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Registration => "setup.registration",
            Self::Analytics => "setup.analytics",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Registration => json!({
            "defaultPenaltyAmount": DEFAULT_PENALTY_AMOUNT,
            "maxSlipCredits": DEFAULT_MAX_SLIP_CREDITS
        }),
        SetupSection::Analytics => json!({
            "recentGradesLimit": 5
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_amount(v: &Value, key: &str, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !n.is_finite() || !(0.0..=max).contains(&n) {
        return Err(format!("{} must be in 0..={}", key, max));
    }
    Ok(crate::rules::round2(n))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Registration => match k.as_str() {
                "defaultPenaltyAmount" => {
                    obj.insert(k.clone(), Value::from(parse_amount(v, k, 100_000.0)?));
                }
                "maxSlipCredits" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 60)?));
                }
                _ => return Err(format!("unknown registration field: {}", k)),
            },
            SetupSection::Analytics => match k.as_str() {
                "recentGradesLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                _ => return Err(format!("unknown analytics field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %msg, "ignoring stored settings");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct RegistrationConfig {
    pub default_penalty_amount: f64,
    pub max_slip_credits: i64,
}

pub fn registration_config(conn: &Connection) -> Result<RegistrationConfig, HandlerErr> {
    let v = load_section(conn, SetupSection::Registration)?;
    Ok(RegistrationConfig {
        default_penalty_amount: v
            .get("defaultPenaltyAmount")
            .and_then(|x| x.as_f64())
            .unwrap_or(DEFAULT_PENALTY_AMOUNT),
        max_slip_credits: v
            .get("maxSlipCredits")
            .and_then(|x| x.as_i64())
            .unwrap_or(DEFAULT_MAX_SLIP_CREDITS),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyticsConfig {
    pub recent_grades_limit: i64,
}

pub fn analytics_config(conn: &Connection) -> Result<AnalyticsConfig, HandlerErr> {
    let v = load_section(conn, SetupSection::Analytics)?;
    Ok(AnalyticsConfig {
        recent_grades_limit: v
            .get("recentGradesLimit")
            .and_then(|x| x.as_i64())
            .unwrap_or(5),
    })
}

fn setup_get(conn: &Connection, _caller: &Caller, _params: &Value) -> Result<Value, HandlerErr> {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(section.name().to_string(), load_section(conn, section)?);
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &Connection, caller: &Caller, params: &Value) -> Result<Value, HandlerErr> {
    caller.require(Action::ConfigureSystem)?;
    let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)?;
    tracing::info!(section = section.name(), "settings updated");
    let mut out = Map::new();
    out.insert(section.name().to_string(), current);
    Ok(Value::Object(out))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: Op = match req.method.as_str() {
        "setup.get" => setup_get,
        "setup.update" => setup_update,
        _ => return None,
    };
    Some(run_authed(state, req, op))
}
