use crate::engine;
use crate::entity::{self, EntitySpec, RelationKind, SearchField, CLASSES};
use crate::error::RecordError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::stats::StatSpec;
use crate::store::SqliteStore;
use serde_json::{json, Value};

pub(super) fn entity_param(req: &Request) -> Result<&'static EntitySpec, Value> {
    let Some(name) = req.params.get("entity").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", "missing entity", None));
    };
    entity::lookup(name).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("unknown entity: {}", name),
            None,
        )
    })
}

pub(super) fn id_param(req: &Request, key: &str) -> Result<i64, Value> {
    match req.params.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn record_err(req: &Request, e: RecordError) -> Value {
    if matches!(e, RecordError::Remote(_)) {
        tracing::error!(method = %req.method, error = %e, "record write failed");
    }
    err(&req.id, e.code(), e.to_string(), None)
}

fn stat_key(stat: &StatSpec) -> &'static str {
    match *stat {
        StatSpec::Count { key }
        | StatSpec::CountWhere { key, .. }
        | StatSpec::CountAtLeast { key, .. }
        | StatSpec::Percentage { key, .. }
        | StatSpec::Average { key, .. }
        | StatSpec::DistinctValues { key, .. }
        | StatSpec::SumRelationLen { key, .. }
        | StatSpec::Distribution { key, .. } => key,
    }
}

fn describe(spec: &EntitySpec) -> Value {
    json!({
        "name": spec.name,
        "label": spec.label,
        "fields": spec.fields.iter().map(|f| json!({
            "name": f.name,
            "type": f.ty.as_str(),
            "required": f.required,
        })).collect::<Vec<_>>(),
        "filters": spec.filters.iter().map(|f| json!({
            "field": f.field,
            "kind": f.kind.as_str(),
        })).collect::<Vec<_>>(),
        "search": spec.search.iter().map(|s| match *s {
            SearchField::Own(col) => col.to_string(),
            SearchField::Related { relation, column } => format!("{}.{}", relation, column),
        }).collect::<Vec<_>>(),
        "relations": spec.relations.iter().map(|r| json!({
            "name": r.name,
            "kind": match r.kind {
                RelationKind::BelongsTo { .. } => "belongsTo",
                RelationKind::HasMany { .. } => "hasMany",
            },
            "columns": r.columns,
        })).collect::<Vec<_>>(),
        "dependents": spec.dependents.iter().map(|d| d.label).collect::<Vec<_>>(),
        "stats": spec.stats.iter().map(stat_key).collect::<Vec<_>>(),
        "exportColumns": spec.export.iter().map(|c| c.label).collect::<Vec<_>>(),
    })
}

fn handle_entities_describe(_state: &mut AppState, req: &Request) -> Value {
    if req.params.get("entity").is_some() {
        return match entity_param(req) {
            Ok(spec) => ok(&req.id, json!({ "entities": [describe(spec)] })),
            Err(resp) => resp,
        };
    }
    let all: Vec<Value> = entity::ALL.iter().map(|s| describe(s)).collect();
    ok(&req.id, json!({ "entities": all }))
}

fn handle_records_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let spec = match entity_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match id_param(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::get_one(&SqliteStore::new(conn), spec, id) {
        Ok(row) => ok(&req.id, json!({ "record": row })),
        Err(RecordError::Remote(e)) => err(&req.id, "db_query_failed", e.to_string(), None),
        Err(e) => record_err(req, e),
    }
}

fn handle_records_create(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let spec = match entity_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(fields) = req.params.get("fields").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "fields must be an object", None);
    };
    match engine::create_one(&SqliteStore::new(conn), spec, fields) {
        Ok(id) => ok(&req.id, json!({ "id": id })),
        Err(e) => record_err(req, e),
    }
}

fn handle_records_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let spec = match entity_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match id_param(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    match engine::update_one(&SqliteStore::new(conn), spec, id, patch) {
        Ok(()) => ok(&req.id, json!({ "id": id })),
        Err(e) => record_err(req, e),
    }
}

fn handle_enrollments_set(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match id_param(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw_ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "studentIds must be an array", None);
    };
    let mut student_ids: Vec<i64> = Vec::with_capacity(raw_ids.len());
    for v in raw_ids {
        let Some(id) = v.as_i64() else {
            return err(&req.id, "bad_params", "studentIds must be integers", None);
        };
        if !student_ids.contains(&id) {
            student_ids.push(id);
        }
    }
    match engine::set_links(&SqliteStore::new(conn), &CLASSES, "students", class_id, &student_ids) {
        Ok(count) => ok(&req.id, json!({ "classId": class_id, "count": count })),
        Err(e) => record_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "entities.describe" => Some(handle_entities_describe(state, req)),
        "records.get" => Some(handle_records_get(state, req)),
        "records.create" => Some(handle_records_create(state, req)),
        "records.update" => Some(handle_records_update(state, req)),
        "enrollments.set" => Some(handle_enrollments_set(state, req)),
        _ => None,
    }
}
