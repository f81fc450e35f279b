//! List query engine: page fetches, deletes and record edits against an
//! explicitly supplied [`DataStore`].

use chrono::NaiveDate;
use serde::Serialize;

use crate::entity::{EntitySpec, FieldSpec, FieldType, RelationKind};
use crate::error::{DeleteError, QueryError, RecordError};
use crate::query::{FilterState, ListQuery, PageRequest, Scalar, SearchState};
use crate::store::{DataStore, Row};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub rows: Vec<Row>,
    pub total_count: u64,
}

pub fn fetch_page(
    store: &dyn DataStore,
    spec: &'static EntitySpec,
    filters: &FilterState,
    search: &SearchState,
    page: PageRequest,
) -> Result<PageResult, QueryError> {
    let query = ListQuery::build(spec, filters, search)?.paged(page);
    let total_count = store.count_rows(&query)?;
    let rows = store.select_rows(&query)?;
    tracing::debug!(
        entity = spec.name,
        page = page.number,
        window_from = page.from(),
        window_to = page.to(),
        rows = rows.len(),
        total = total_count,
        "page fetched"
    );
    Ok(PageResult { rows, total_count })
}

/// Every row matching the filters and search, without a page window.
pub fn fetch_all(
    store: &dyn DataStore,
    spec: &'static EntitySpec,
    filters: &FilterState,
    search: &SearchState,
) -> Result<Vec<Row>, QueryError> {
    let query = ListQuery::build(spec, filters, search)?;
    Ok(store.select_rows(&query)?)
}

/// Deletes one record after checking that no dependent rows reference it.
pub fn delete_one(
    store: &dyn DataStore,
    spec: &'static EntitySpec,
    id: i64,
) -> Result<(), DeleteError> {
    for dep in spec.dependents {
        let count = store.count_children(dep, id)?;
        if count > 0 {
            tracing::info!(
                entity = spec.name,
                id,
                dependents = dep.label,
                count,
                "delete blocked by dependents"
            );
            return Err(DeleteError::HasDependents {
                entity: spec.name,
                id,
                label: dep.label,
                count,
            });
        }
    }
    let affected = store.delete_row(spec, id)?;
    if affected == 0 {
        return Err(DeleteError::NotFound {
            entity: spec.name,
            id,
        });
    }
    tracing::info!(entity = spec.name, id, "record deleted");
    Ok(())
}

pub fn get_one(store: &dyn DataStore, spec: &'static EntitySpec, id: i64) -> Result<Row, RecordError> {
    store.find_row(spec, id)?.ok_or(RecordError::NotFound {
        entity: spec.name,
        id,
    })
}

fn coerce_field(def: &FieldSpec, v: &serde_json::Value) -> Result<Option<Scalar>, RecordError> {
    let invalid = |expected: &'static str| RecordError::InvalidValue {
        field: def.name.to_string(),
        expected,
    };
    if v.is_null() {
        return if def.required {
            Err(RecordError::MissingField(def.name))
        } else {
            Ok(None)
        };
    }
    let scalar = match def.ty {
        FieldType::Text => {
            let s = v.as_str().ok_or_else(|| invalid("text"))?.trim().to_string();
            if s.is_empty() {
                if def.required {
                    return Err(RecordError::MissingField(def.name));
                }
                return Ok(None);
            }
            Scalar::Text(s)
        }
        FieldType::Integer => {
            let n = match v {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            Scalar::Int(n.ok_or_else(|| invalid("an integer"))?)
        }
        FieldType::Real => {
            let n = match v {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            Scalar::Real(n.ok_or_else(|| invalid("a number"))?)
        }
        FieldType::Date => {
            let s = v.as_str().ok_or_else(|| invalid("a YYYY-MM-DD date"))?;
            let d = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| invalid("a YYYY-MM-DD date"))?;
            Scalar::Text(d.format("%Y-%m-%d").to_string())
        }
    };
    Ok(Some(scalar))
}

fn collect_values(
    spec: &'static EntitySpec,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<(&'static str, Option<Scalar>)>, RecordError> {
    if let Some(unknown) = fields.keys().find(|k| spec.field(k).is_none()) {
        return Err(RecordError::UnknownField(unknown.clone()));
    }
    let mut values = Vec::new();
    for def in spec.fields {
        if let Some(v) = fields.get(def.name) {
            values.push((def.name, coerce_field(def, v)?));
        }
    }
    Ok(values)
}

pub fn create_one(
    store: &dyn DataStore,
    spec: &'static EntitySpec,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<i64, RecordError> {
    if let Some(missing) = spec
        .fields
        .iter()
        .find(|f| f.required && !fields.contains_key(f.name))
    {
        return Err(RecordError::MissingField(missing.name));
    }
    let values = collect_values(spec, fields)?;
    let id = store.insert_row(spec, &values)?;
    tracing::info!(entity = spec.name, id, "record created");
    Ok(id)
}

pub fn update_one(
    store: &dyn DataStore,
    spec: &'static EntitySpec,
    id: i64,
    patch: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), RecordError> {
    let values = collect_values(spec, patch)?;
    if store.update_row(spec, id, &values)? == 0 {
        return Err(RecordError::NotFound {
            entity: spec.name,
            id,
        });
    }
    tracing::info!(entity = spec.name, id, fields = values.len(), "record updated");
    Ok(())
}

/// Replaces the rows linked to `owner` through a has-many relation.
pub fn set_links(
    store: &dyn DataStore,
    spec: &'static EntitySpec,
    relation: &str,
    owner: i64,
    targets: &[i64],
) -> Result<usize, RecordError> {
    let Some(rel) = spec
        .relation(relation)
        .filter(|r| matches!(r.kind, RelationKind::HasMany { .. }))
    else {
        return Err(RecordError::UnknownField(relation.to_string()));
    };
    if store.find_row(spec, owner)?.is_none() {
        return Err(RecordError::NotFound {
            entity: spec.name,
            id: owner,
        });
    }
    Ok(store.replace_links(rel, owner, targets)?)
}

/// Distinct values used to populate a header filter control. Store failures
/// degrade to an empty list so the screen itself still loads.
pub fn distinct_options(
    store: &dyn DataStore,
    spec: &'static EntitySpec,
    field: &str,
) -> Result<Vec<serde_json::Value>, QueryError> {
    let Some(def) = spec.field(field) else {
        return Err(QueryError::UnknownFilter {
            entity: spec.name,
            field: field.to_string(),
        });
    };
    match store.distinct_values(spec, def.name) {
        Ok(values) => Ok(values),
        Err(e) => {
            tracing::warn!(entity = spec.name, field, error = %e, "filter options unavailable");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;
    use crate::entity::{DependentSpec, RelationSpec, CLASSES, STUDENTS};
    use crate::error::StoreError;
    use crate::query::FilterPatch;
    use crate::stats::{project, StatsScope};
    use crate::store::SqliteStore;
    use rusqlite::Connection;
    use serde_json::json;
    use std::cell::RefCell;

    /// Store double that records every call and fails on demand.
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub calls: RefCell<Vec<&'static str>>,
        pub children: u64,
        pub fail: bool,
    }

    impl RecordingStore {
        fn call(&self, name: &'static str) -> Result<(), StoreError> {
            self.calls.borrow_mut().push(name);
            if self.fail {
                return Err(StoreError::Backend("connection reset".to_string()));
            }
            Ok(())
        }
    }

    impl DataStore for RecordingStore {
        fn select_rows(&self, _query: &ListQuery) -> Result<Vec<Row>, StoreError> {
            self.call("select_rows")?;
            Ok(Vec::new())
        }
        fn count_rows(&self, _query: &ListQuery) -> Result<u64, StoreError> {
            self.call("count_rows")?;
            Ok(0)
        }
        fn count_children(&self, _dep: &DependentSpec, _id: i64) -> Result<u64, StoreError> {
            self.call("count_children")?;
            Ok(self.children)
        }
        fn delete_row(&self, _spec: &'static EntitySpec, _id: i64) -> Result<usize, StoreError> {
            self.call("delete_row")?;
            Ok(1)
        }
        fn distinct_values(
            &self,
            _spec: &'static EntitySpec,
            _column: &'static str,
        ) -> Result<Vec<serde_json::Value>, StoreError> {
            self.call("distinct_values")?;
            Ok(vec![json!("Ativo")])
        }
        fn insert_row(
            &self,
            _spec: &'static EntitySpec,
            _values: &[(&'static str, Option<Scalar>)],
        ) -> Result<i64, StoreError> {
            self.call("insert_row")?;
            Ok(1)
        }
        fn update_row(
            &self,
            _spec: &'static EntitySpec,
            _id: i64,
            _values: &[(&'static str, Option<Scalar>)],
        ) -> Result<usize, StoreError> {
            self.call("update_row")?;
            Ok(1)
        }
        fn replace_links(
            &self,
            _relation: &RelationSpec,
            _owner: i64,
            targets: &[i64],
        ) -> Result<usize, StoreError> {
            self.call("replace_links")?;
            Ok(targets.len())
        }
    }

    /// 25 students, the first 12 active.
    pub(crate) fn seed_students(conn: &Connection) {
        for i in 1..=25 {
            let status = if i <= 12 { "Ativo" } else { "Inativo" };
            conn.execute(
                "INSERT INTO students(id, name, status) VALUES(?, ?, ?)",
                (i, format!("Aluno {:02}", i), status),
            )
            .expect("insert student");
        }
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn filters(v: serde_json::Value) -> FilterState {
        FilterState::new().with_patch(&FilterPatch::from_json(&v).expect("patch"))
    }

    #[test]
    fn active_filter_counts_all_matches_but_stats_see_one_page() {
        let conn = memory_db();
        seed_students(&conn);
        let store = SqliteStore::new(&conn);

        let f = filters(json!({ "status": "Ativo" }));
        let page = fetch_page(&store, &STUDENTS, &f, &SearchState::default(), PageRequest::first())
            .expect("page");
        assert_eq!(page.total_count, 12);
        assert_eq!(page.rows.len(), 10);

        let snap = project(&STUDENTS, &page.rows, StatsScope::Page);
        assert_eq!(snap.counts["active"], 10);

        let all = fetch_all(&store, &STUDENTS, &f, &SearchState::default()).expect("all");
        assert_eq!(project(&STUDENTS, &all, StatsScope::Filtered).counts["active"], 12);

        let second = fetch_page(
            &store,
            &STUDENTS,
            &f,
            &SearchState::default(),
            PageRequest::new(2).expect("page"),
        )
        .expect("page 2");
        assert_eq!(second.rows.len(), 2);
        assert_eq!(second.rows[0]["name"], json!("Aluno 11"));
    }

    #[test]
    fn rows_never_exceed_page_size() {
        let conn = memory_db();
        seed_students(&conn);
        let store = SqliteStore::new(&conn);
        for n in 1..=4 {
            let page = fetch_page(
                &store,
                &STUDENTS,
                &FilterState::new(),
                &SearchState::default(),
                PageRequest::new(n).expect("page"),
            )
            .expect("page");
            assert!(page.rows.len() <= 10);
            assert_eq!(page.total_count, 25);
        }
    }

    #[test]
    fn no_matches_yield_empty_page() {
        let conn = memory_db();
        seed_students(&conn);
        let store = SqliteStore::new(&conn);
        let page = fetch_page(
            &store,
            &STUDENTS,
            &filters(json!({ "status": "Transferido" })),
            &SearchState::new("zzz"),
            PageRequest::first(),
        )
        .expect("page");
        assert_eq!(page, PageResult::default());
    }

    #[test]
    fn store_failure_surfaces_as_query_error() {
        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };
        let e = fetch_page(
            &store,
            &STUDENTS,
            &FilterState::new(),
            &SearchState::default(),
            PageRequest::first(),
        )
        .expect_err("remote failure");
        assert_eq!(e.code(), "db_query_failed");
        assert!(e.is_retryable());
        assert!(e.to_string().contains("connection reset"));
    }

    #[test]
    fn invalid_filters_never_reach_the_store() {
        let store = RecordingStore::default();
        let e = fetch_page(
            &store,
            &STUDENTS,
            &filters(json!({ "nickname": "x" })),
            &SearchState::default(),
            PageRequest::first(),
        )
        .expect_err("invalid");
        assert!(!e.is_retryable());
        assert!(store.calls.borrow().is_empty());
    }

    #[test]
    fn delete_with_dependents_is_rejected_before_delete() {
        let store = RecordingStore {
            children: 3,
            ..Default::default()
        };
        let e = delete_one(&store, &CLASSES, 7).expect_err("blocked");
        assert!(matches!(
            e,
            DeleteError::HasDependents {
                count: 3,
                label: "enrolled students",
                ..
            }
        ));
        assert!(!store.calls.borrow().contains(&"delete_row"));
    }

    #[test]
    fn delete_against_sqlite() {
        let conn = memory_db();
        seed_students(&conn);
        conn.execute("INSERT INTO classes(id, name, status) VALUES(1, 'Turma A', 'Ativo')", [])
            .expect("class");
        let store = SqliteStore::new(&conn);
        set_links(&store, &CLASSES, "students", 1, &[1, 2]).expect("enroll");

        assert_eq!(
            delete_one(&store, &CLASSES, 1).expect_err("blocked").code(),
            "has_dependents"
        );
        assert_eq!(
            delete_one(&store, &STUDENTS, 1).expect_err("blocked").code(),
            "has_dependents"
        );
        delete_one(&store, &STUDENTS, 25).expect("delete");
        assert_eq!(
            delete_one(&store, &STUDENTS, 25).expect_err("gone").code(),
            "not_found"
        );

        set_links(&store, &CLASSES, "students", 1, &[]).expect("unenroll");
        delete_one(&store, &CLASSES, 1).expect("delete class");
    }

    #[test]
    fn create_and_update_validate_fields() {
        let conn = memory_db();
        let store = SqliteStore::new(&conn);

        let missing = json!({ "name": "Ana" });
        let e = create_one(&store, &STUDENTS, missing.as_object().expect("obj")).expect_err("missing");
        assert!(matches!(e, RecordError::MissingField("status")));

        let bad_date = json!({ "name": "Ana", "status": "Ativo", "birth_date": "04/03/2012" });
        let e = create_one(&store, &STUDENTS, bad_date.as_object().expect("obj")).expect_err("date");
        assert_eq!(e.code(), "bad_params");

        let unknown = json!({ "name": "Ana", "status": "Ativo", "nickname": "Aninha" });
        let e = create_one(&store, &STUDENTS, unknown.as_object().expect("obj")).expect_err("unknown");
        assert!(matches!(e, RecordError::UnknownField(_)));

        let ok = json!({ "name": " Ana ", "status": "Ativo", "birth_date": "2012-03-04" });
        let id = create_one(&store, &STUDENTS, ok.as_object().expect("obj")).expect("create");
        let row = get_one(&store, &STUDENTS, id).expect("get");
        assert_eq!(row["name"], json!("Ana"));
        assert_eq!(row["birth_date"], json!("2012-03-04"));

        let patch = json!({ "status": "Inativo", "grade": "7º ano" });
        update_one(&store, &STUDENTS, id, patch.as_object().expect("obj")).expect("update");
        assert_eq!(get_one(&store, &STUDENTS, id).expect("get")["status"], json!("Inativo"));

        let e = update_one(&store, &STUDENTS, 999, patch.as_object().expect("obj")).expect_err("nf");
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn option_lookups_degrade_to_empty() {
        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };
        assert!(distinct_options(&store, &STUDENTS, "status").expect("degraded").is_empty());
        assert!(distinct_options(&store, &STUDENTS, "shoe_size").is_err());
    }
}
