//! Data store capability interface and its SQLite implementation.

use std::collections::HashMap;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};

use crate::entity::{DependentSpec, EntitySpec, RelationKind, RelationSpec};
use crate::error::StoreError;
use crate::query::{Column, ListQuery, Predicate, Scalar};

/// One entity record as returned to the presentation layer. Relation
/// includes are embedded under the relation name.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub trait DataStore {
    /// Rows matching the query, ordered and windowed, relations embedded.
    fn select_rows(&self, query: &ListQuery) -> Result<Vec<Row>, StoreError>;

    /// Exact count of rows matching the query predicates; ignores the window.
    fn count_rows(&self, query: &ListQuery) -> Result<u64, StoreError>;

    fn count_children(&self, dependent: &DependentSpec, id: i64) -> Result<u64, StoreError>;

    fn delete_row(&self, spec: &'static EntitySpec, id: i64) -> Result<usize, StoreError>;

    fn distinct_values(
        &self,
        spec: &'static EntitySpec,
        column: &'static str,
    ) -> Result<Vec<serde_json::Value>, StoreError>;

    fn insert_row(
        &self,
        spec: &'static EntitySpec,
        values: &[(&'static str, Option<Scalar>)],
    ) -> Result<i64, StoreError>;

    fn update_row(
        &self,
        spec: &'static EntitySpec,
        id: i64,
        values: &[(&'static str, Option<Scalar>)],
    ) -> Result<usize, StoreError>;

    /// Replaces every link of `owner` in a has-many join table.
    fn replace_links(
        &self,
        relation: &RelationSpec,
        owner: i64,
        targets: &[i64],
    ) -> Result<usize, StoreError>;

    fn find_row(&self, spec: &'static EntitySpec, id: i64) -> Result<Option<Row>, StoreError> {
        let query = ListQuery {
            spec,
            predicates: vec![Predicate::Equals {
                column: spec.primary_key,
                value: Scalar::Int(id),
            }],
            window: None,
        };
        Ok(self.select_rows(&query)?.into_iter().next())
    }
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

fn scalar_value(s: &Scalar) -> Value {
    match s {
        Scalar::Int(v) => Value::Integer(*v),
        Scalar::Real(v) => Value::Real(*v),
        Scalar::Text(v) => Value::Text(v.clone()),
    }
}

fn json_value(v: ValueRef<'_>) -> serde_json::Value {
    match v {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

fn render_predicate(p: &Predicate, spec: &EntitySpec, sql: &mut String, binds: &mut Vec<Value>) {
    match p {
        Predicate::Equals { column, value } => {
            sql.push_str(&format!("t.{} = ?", column));
            binds.push(scalar_value(value));
        }
        Predicate::AtLeast { column, value } => {
            sql.push_str(&format!("t.{} >= ?", column));
            binds.push(scalar_value(value));
        }
        Predicate::AtMost { column, value } => {
            sql.push_str(&format!("t.{} <= ?", column));
            binds.push(scalar_value(value));
        }
        Predicate::Contains { column, needle } => {
            match column {
                Column::Own(c) => {
                    sql.push_str(&format!("fold(t.{}) LIKE ? ESCAPE '\\'", c));
                }
                Column::Related { relation, column } => match relation.kind {
                    RelationKind::BelongsTo { foreign_key } => sql.push_str(&format!(
                        "t.{} IN (SELECT r.id FROM {} r WHERE fold(r.{}) LIKE ? ESCAPE '\\')",
                        foreign_key, relation.table, column
                    )),
                    RelationKind::HasMany {
                        through,
                        local_key,
                        remote_key,
                    } => sql.push_str(&format!(
                        "t.{} IN (SELECT j.{} FROM {} j JOIN {} r ON r.id = j.{} WHERE fold(r.{}) LIKE ? ESCAPE '\\')",
                        spec.primary_key, local_key, through, relation.table, remote_key, column
                    )),
                },
            }
            binds.push(Value::Text(like_pattern(needle)));
        }
        Predicate::AnyOf(any) => {
            if any.is_empty() {
                sql.push('0');
                return;
            }
            sql.push('(');
            for (i, inner) in any.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" OR ");
                }
                render_predicate(inner, spec, sql, binds);
            }
            sql.push(')');
        }
    }
}

/// WHERE clause (with leading space) and its bind values.
pub(crate) fn render_where(query: &ListQuery) -> (String, Vec<Value>) {
    let mut sql = String::new();
    let mut binds = Vec::new();
    for (i, p) in query.predicates.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        render_predicate(p, query.spec, &mut sql, &mut binds);
    }
    (sql, binds)
}

pub(crate) fn render_select(query: &ListQuery) -> (String, Vec<Value>) {
    let spec = query.spec;
    let mut columns = vec![format!("t.{}", spec.primary_key)];
    columns.extend(spec.fields.iter().map(|f| format!("t.{}", f.name)));
    let (where_sql, mut binds) = render_where(query);

    let direction = if spec.order_by.descending { "DESC" } else { "ASC" };
    let mut order = format!("t.{} {}", spec.order_by.column, direction);
    if spec.order_by.column != spec.primary_key {
        order.push_str(&format!(", t.{} ASC", spec.primary_key));
    }

    let mut sql = format!(
        "SELECT {} FROM {} t{} ORDER BY {}",
        columns.join(", "),
        spec.table,
        where_sql,
        order
    );
    if let Some(w) = query.window {
        sql.push_str(" LIMIT ? OFFSET ?");
        binds.push(Value::Integer(w.limit as i64));
        binds.push(Value::Integer(w.offset as i64));
    }
    (sql, binds)
}

impl SqliteStore<'_> {
    fn load_belongs_to(
        &self,
        relation: &RelationSpec,
        foreign_key: &str,
        rows: &mut [Row],
    ) -> Result<(), StoreError> {
        let mut keys: Vec<i64> = rows
            .iter()
            .filter_map(|r| r.get(foreign_key).and_then(|v| v.as_i64()))
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let mut by_id: HashMap<i64, Row> = HashMap::new();
        if !keys.is_empty() {
            let sql = format!(
                "SELECT {} FROM {} WHERE id IN ({})",
                relation.columns.join(", "),
                relation.table,
                placeholders(keys.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut q = stmt.query(params_from_iter(keys.iter()))?;
            while let Some(r) = q.next()? {
                let mut obj = Row::new();
                for (i, c) in relation.columns.iter().enumerate() {
                    obj.insert(c.to_string(), json_value(r.get_ref(i)?));
                }
                let id: i64 = r.get(0)?;
                by_id.insert(id, obj);
            }
        }

        for row in rows.iter_mut() {
            let related = row
                .get(foreign_key)
                .and_then(|v| v.as_i64())
                .and_then(|k| by_id.get(&k).cloned())
                .map(serde_json::Value::Object)
                .unwrap_or(serde_json::Value::Null);
            row.insert(relation.name.to_string(), related);
        }
        Ok(())
    }

    fn load_has_many(
        &self,
        relation: &RelationSpec,
        (through, local_key, remote_key): (&str, &str, &str),
        primary_key: &str,
        rows: &mut [Row],
    ) -> Result<(), StoreError> {
        let owners: Vec<i64> = rows
            .iter()
            .filter_map(|r| r.get(primary_key).and_then(|v| v.as_i64()))
            .collect();

        let mut grouped: HashMap<i64, Vec<serde_json::Value>> = HashMap::new();
        if !owners.is_empty() {
            let cols = relation
                .columns
                .iter()
                .map(|c| format!("r.{}", c))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT j.{}, {} FROM {} j JOIN {} r ON r.id = j.{} WHERE j.{} IN ({}) ORDER BY r.id",
                local_key,
                cols,
                through,
                relation.table,
                remote_key,
                local_key,
                placeholders(owners.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut q = stmt.query(params_from_iter(owners.iter()))?;
            while let Some(r) = q.next()? {
                let owner: i64 = r.get(0)?;
                let mut obj = Row::new();
                for (i, c) in relation.columns.iter().enumerate() {
                    obj.insert(c.to_string(), json_value(r.get_ref(i + 1)?));
                }
                grouped
                    .entry(owner)
                    .or_default()
                    .push(serde_json::Value::Object(obj));
            }
        }

        for row in rows.iter_mut() {
            let items = row
                .get(primary_key)
                .and_then(|v| v.as_i64())
                .and_then(|k| grouped.remove(&k))
                .unwrap_or_default();
            row.insert(relation.name.to_string(), serde_json::Value::Array(items));
        }
        Ok(())
    }
}

impl DataStore for SqliteStore<'_> {
    fn select_rows(&self, query: &ListQuery) -> Result<Vec<Row>, StoreError> {
        let spec = query.spec;
        let (sql, binds) = render_select(query);
        let mut names = vec![spec.primary_key];
        names.extend(spec.fields.iter().map(|f| f.name));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut q = stmt.query(params_from_iter(binds))?;
        let mut rows = Vec::new();
        while let Some(r) = q.next()? {
            let mut row = Row::new();
            for (i, name) in names.iter().enumerate() {
                row.insert(name.to_string(), json_value(r.get_ref(i)?));
            }
            rows.push(row);
        }

        for relation in spec.relations {
            match relation.kind {
                RelationKind::BelongsTo { foreign_key } => {
                    self.load_belongs_to(relation, foreign_key, &mut rows)?
                }
                RelationKind::HasMany {
                    through,
                    local_key,
                    remote_key,
                } => self.load_has_many(
                    relation,
                    (through, local_key, remote_key),
                    spec.primary_key,
                    &mut rows,
                )?,
            }
        }
        Ok(rows)
    }

    fn count_rows(&self, query: &ListQuery) -> Result<u64, StoreError> {
        let (where_sql, binds) = render_where(query);
        let sql = format!("SELECT COUNT(*) FROM {} t{}", query.spec.table, where_sql);
        let n: i64 = self
            .conn
            .query_row(&sql, params_from_iter(binds), |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    fn count_children(&self, dependent: &DependentSpec, id: i64) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            dependent.table, dependent.foreign_key
        );
        let n: i64 = self.conn.query_row(&sql, [id], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    fn delete_row(&self, spec: &'static EntitySpec, id: i64) -> Result<usize, StoreError> {
        let sql = format!("DELETE FROM {} WHERE {} = ?", spec.table, spec.primary_key);
        Ok(self.conn.execute(&sql, [id])?)
    }

    fn distinct_values(
        &self,
        spec: &'static EntitySpec,
        column: &'static str,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let sql = format!(
            "SELECT DISTINCT {c} FROM {t} WHERE {c} IS NOT NULL ORDER BY {c}",
            c = column,
            t = spec.table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut q = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(r) = q.next()? {
            out.push(json_value(r.get_ref(0)?));
        }
        Ok(out)
    }

    fn insert_row(
        &self,
        spec: &'static EntitySpec,
        values: &[(&'static str, Option<Scalar>)],
    ) -> Result<i64, StoreError> {
        let columns = values.iter().map(|(c, _)| *c).collect::<Vec<_>>();
        let sql = format!(
            "INSERT INTO {}({}) VALUES({})",
            spec.table,
            columns.join(", "),
            placeholders(columns.len())
        );
        let binds = values
            .iter()
            .map(|(_, v)| v.as_ref().map(scalar_value).unwrap_or(Value::Null));
        self.conn.execute(&sql, params_from_iter(binds))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_row(
        &self,
        spec: &'static EntitySpec,
        id: i64,
        values: &[(&'static str, Option<Scalar>)],
    ) -> Result<usize, StoreError> {
        if values.is_empty() {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE {} = ?", spec.table, spec.primary_key),
                [id],
                |r| r.get(0),
            )?;
            return Ok(n.max(0) as usize);
        }
        let sets = values
            .iter()
            .map(|(c, _)| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            spec.table, sets, spec.primary_key
        );
        let mut binds: Vec<Value> = values
            .iter()
            .map(|(_, v)| v.as_ref().map(scalar_value).unwrap_or(Value::Null))
            .collect();
        binds.push(Value::Integer(id));
        Ok(self.conn.execute(&sql, params_from_iter(binds))?)
    }

    fn replace_links(
        &self,
        relation: &RelationSpec,
        owner: i64,
        targets: &[i64],
    ) -> Result<usize, StoreError> {
        let RelationKind::HasMany {
            through,
            local_key,
            remote_key,
        } = relation.kind
        else {
            return Err(StoreError::Backend(format!(
                "relation {} has no join table",
                relation.name
            )));
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?", through, local_key),
            [owner],
        )?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {}({}, {}) VALUES(?, ?)",
                through, local_key, remote_key
            ))?;
            for target in targets {
                inserted += stmt.execute((owner, target))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }
}
