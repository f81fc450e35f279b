use crate::db;
use crate::export::CsvFormat;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::stats::StatsScope;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Stats,
    Export,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "stats" => Some(Self::Stats),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Stats => "setup.stats",
            Self::Export => "setup.export",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Stats => json!({
            "scope": StatsScope::default().as_str()
        }),
        SetupSection::Export => json!({
            "decimalPlaces": CsvFormat::default().decimal_places,
            "fileNamePrefix": "export"
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

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Stats => match k.as_str() {
                "scope" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    let Some(scope) = StatsScope::parse(&s) else {
                        return Err("scope must be one of: page, filtered".into());
                    };
                    obj.insert(k.clone(), Value::String(scope.as_str().to_string()));
                }
                _ => return Err(format!("unknown stats field: {}", k)),
            },
            SetupSection::Export => match k.as_str() {
                "decimalPlaces" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 4)?));
                }
                "fileNamePrefix" => {
                    let s = parse_string_max(v, k, 32)?;
                    if s.chars().any(|c| matches!(c, '/' | '\\' | ':')) {
                        return Err("fileNamePrefix must not contain path separators".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown export field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let defaults = default_section(section);
    let Some(saved) = db::settings_get_json(conn, section.key())? else {
        return Ok(defaults);
    };
    let Some(saved_obj) = saved.as_object() else {
        tracing::warn!(section = section.key(), "stored settings are not an object, using defaults");
        return Ok(defaults);
    };
    // All or nothing: a malformed stored value falls back to defaults entirely.
    let mut merged = defaults.clone();
    match merge_section_patch(section, &mut merged, saved_obj) {
        Ok(()) => Ok(merged),
        Err(msg) => {
            tracing::warn!(section = section.key(), error = %msg, "stored settings invalid, using defaults");
            Ok(defaults)
        }
    }
}

fn load_or_default(conn: &rusqlite::Connection, section: SetupSection) -> Value {
    load_section(conn, section).unwrap_or_else(|e| {
        tracing::warn!(section = section.key(), error = ?e, "settings unavailable, using defaults");
        default_section(section)
    })
}

/// Rows the stat cards are computed over.
pub fn stats_scope(conn: &rusqlite::Connection) -> StatsScope {
    load_or_default(conn, SetupSection::Stats)
        .get("scope")
        .and_then(|v| v.as_str())
        .and_then(StatsScope::parse)
        .unwrap_or_default()
}

/// CSV number format and file name prefix.
pub fn export_settings(conn: &rusqlite::Connection) -> (CsvFormat, String) {
    let section = load_or_default(conn, SetupSection::Export);
    let decimal_places = section
        .get("decimalPlaces")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(CsvFormat::default().decimal_places);
    let prefix = section
        .get("fileNamePrefix")
        .and_then(|v| v.as_str())
        .unwrap_or("export")
        .to_string();
    (CsvFormat { decimal_places }, prefix)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let stats = match load_section(conn, SetupSection::Stats) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let export = match load_section(conn, SetupSection::Export) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "stats": stats,
            "export": export
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "settings updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
