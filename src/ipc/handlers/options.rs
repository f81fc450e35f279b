use crate::engine;
use crate::ipc::error::{err, ok, query_err};
use crate::ipc::handlers::records::entity_param;
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

fn handle_options_distinct(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let spec = match entity_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(field) = req.params.get("field").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing field", None);
    };
    match engine::distinct_options(&SqliteStore::new(conn), spec, field) {
        Ok(values) => ok(&req.id, json!({ "field": field, "values": values })),
        Err(e) => query_err(&req.id, None, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "options.distinct" => Some(handle_options_distinct(state, req)),
        _ => None,
    }
}
