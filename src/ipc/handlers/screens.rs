use crate::error::ExportError;
use crate::ipc::error::{err, ok, query_err};
use crate::ipc::handlers::records::{entity_param, id_param};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use crate::query::FilterPatch;
use crate::session::ScreenSession;
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

fn screen_id_param(req: &Request) -> Result<&str, Value> {
    req.params
        .get("screenId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", "missing screenId", None))
}

/// The open workspace plus one screen; both borrowed out of `state` at once.
fn screen_ctx<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<(&'a Connection, &'a mut ScreenSession), Value> {
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let screen_id = screen_id_param(req)?;
    let Some(screen) = state.screens.get_mut(screen_id) else {
        return Err(err(
            &req.id,
            "not_found",
            format!("unknown screen: {}", screen_id),
            None,
        ));
    };
    Ok((conn, screen))
}

fn view(req: &Request, screen: &ScreenSession) -> Value {
    match serde_json::to_value(screen.view()) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_screens_open(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let spec = match entity_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut screen = ScreenSession::new(uuid::Uuid::new_v4().to_string(), spec);
    if let Some(term) = req.params.get("search").and_then(|v| v.as_str()) {
        screen.set_search(term);
    }
    if let Some(raw) = req.params.get("filters").filter(|v| !v.is_null()) {
        let applied = FilterPatch::from_json(raw).and_then(|patch| screen.set_filters(&patch));
        if let Err(e) = applied {
            return query_err(&req.id, None, &e);
        }
    }

    let scope = setup::stats_scope(conn);
    let outcome = screen.refresh(&SqliteStore::new(conn), scope);
    let screen_id = screen.id().to_string();
    tracing::info!(screen = %screen_id, entity = spec.name, scope = scope.as_str(), "screen opened");

    let resp = match outcome {
        Ok(()) => view(req, &screen),
        Err(e) => query_err(&req.id, Some(screen_id.as_str()), &e),
    };
    // A failed first load still registers the screen so it can be retried.
    state.screens.insert(screen_id, screen);
    resp
}

fn handle_screens_search(state: &mut AppState, req: &Request) -> Value {
    let (conn, screen) = match screen_ctx(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = req
        .params
        .get("term")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let scope = setup::stats_scope(conn);
    match screen.on_search(&SqliteStore::new(conn), scope, term) {
        Ok(()) => view(req, screen),
        Err(e) => query_err(&req.id, Some(screen.id()), &e),
    }
}

fn handle_screens_filter(state: &mut AppState, req: &Request) -> Value {
    let (conn, screen) = match screen_ctx(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
    };
    let patch = match FilterPatch::from_json(raw) {
        Ok(v) => v,
        Err(e) => return query_err(&req.id, Some(screen.id()), &e),
    };
    let scope = setup::stats_scope(conn);
    match screen.on_filter_change(&SqliteStore::new(conn), scope, &patch) {
        Ok(()) => view(req, screen),
        Err(e) => query_err(&req.id, Some(screen.id()), &e),
    }
}

fn handle_screens_page(state: &mut AppState, req: &Request) -> Value {
    let (conn, screen) = match screen_ctx(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(number) = req.params.get("page").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "page must be an integer", None);
    };
    let scope = setup::stats_scope(conn);
    match screen.on_page_change(&SqliteStore::new(conn), scope, number) {
        Ok(()) => view(req, screen),
        Err(e) => query_err(&req.id, Some(screen.id()), &e),
    }
}

fn handle_screens_retry(state: &mut AppState, req: &Request) -> Value {
    let (conn, screen) = match screen_ctx(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scope = setup::stats_scope(conn);
    tracing::debug!(screen = %screen.id(), "retry");
    match screen.refresh(&SqliteStore::new(conn), scope) {
        Ok(()) => view(req, screen),
        Err(e) => query_err(&req.id, Some(screen.id()), &e),
    }
}

fn handle_screens_state(state: &mut AppState, req: &Request) -> Value {
    match screen_ctx(state, req) {
        Ok((_, screen)) => view(req, screen),
        Err(resp) => resp,
    }
}

fn handle_screens_delete(state: &mut AppState, req: &Request) -> Value {
    let (conn, screen) = match screen_ctx(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match id_param(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scope = setup::stats_scope(conn);
    match screen.on_delete(&SqliteStore::new(conn), scope, id) {
        Ok(()) => view(req, screen),
        Err(e) => err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "screenId": screen.id(), "id": id })),
        ),
    }
}

fn handle_screens_export(state: &mut AppState, req: &Request) -> Value {
    let (conn, screen) = match screen_ctx(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (format, prefix) = setup::export_settings(conn);
    let file = match screen.on_export(format, &prefix) {
        Ok(v) => v,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };

    let out_path = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    if let Some(path) = out_path.as_ref() {
        if let Err(source) = std::fs::write(path, file.csv.as_bytes()) {
            let e = ExportError::Write {
                path: path.to_string_lossy().to_string(),
                source,
            };
            tracing::error!(screen = %screen.id(), error = %e, "export write failed");
            return err(&req.id, e.code(), e.to_string(), None);
        }
    }
    tracing::info!(
        screen = %screen.id(),
        entity = screen.spec().name,
        rows = file.row_count,
        "page exported"
    );

    ok(
        &req.id,
        json!({
            "fileName": file.file_name,
            "csv": file.csv,
            "rowCount": file.row_count,
            "path": out_path.map(|p| p.to_string_lossy().to_string()),
        }),
    )
}

fn handle_screens_close(state: &mut AppState, req: &Request) -> Value {
    let screen_id = match screen_id_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let closed = state.screens.remove(screen_id).is_some();
    if closed {
        tracing::info!(screen = %screen_id, "screen closed");
    }
    ok(&req.id, json!({ "closed": closed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "screens.open" => Some(handle_screens_open(state, req)),
        "screens.search" => Some(handle_screens_search(state, req)),
        "screens.filter" => Some(handle_screens_filter(state, req)),
        "screens.page" => Some(handle_screens_page(state, req)),
        "screens.retry" => Some(handle_screens_retry(state, req)),
        "screens.state" => Some(handle_screens_state(state, req)),
        "screens.delete" => Some(handle_screens_delete(state, req)),
        "screens.export" => Some(handle_screens_export(state, req)),
        "screens.close" => Some(handle_screens_close(state, req)),
        _ => None,
    }
}
