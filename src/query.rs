//! Typed list queries: filter/search/page state and the predicate builder.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::{EntitySpec, FieldType, FilterKind, RelationSpec, SearchField};
use crate::error::QueryError;

pub const PAGE_SIZE: u32 = 10;

/// Bound parameter value. Never spliced into SQL text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Real(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumberRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Number(serde_json::Number),
    Range(NumberRange),
    Dates(DateRange),
}

impl FilterValue {
    /// Empty strings and open ranges impose no constraint.
    pub fn is_unconstrained(&self) -> bool {
        match self {
            FilterValue::Text(s) => s.trim().is_empty(),
            FilterValue::Number(_) => false,
            FilterValue::Range(r) => r.min.is_none() && r.max.is_none(),
            FilterValue::Dates(r) => r.from.is_none() && r.to.is_none(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FilterState(BTreeMap<String, FilterValue>);

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: FilterValue) {
        let field = field.into();
        if value.is_unconstrained() {
            self.0.remove(&field);
        } else {
            self.0.insert(field, value);
        }
    }

    pub fn clear(&mut self, field: &str) {
        self.0.remove(field);
    }

    pub fn get(&self, field: &str) -> Option<&FilterValue> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.0.iter()
    }

    pub fn with_patch(&self, patch: &FilterPatch) -> FilterState {
        let mut next = self.clone();
        for (field, value) in &patch.0 {
            match value {
                Some(v) => next.set(field.clone(), v.clone()),
                None => next.clear(field),
            }
        }
        next
    }
}

/// Partial filter update: `null` clears a field, anything else replaces it.
#[derive(Debug, Clone, Default)]
pub struct FilterPatch(Vec<(String, Option<FilterValue>)>);

impl FilterPatch {
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, QueryError> {
        let Some(obj) = raw.as_object() else {
            return Err(QueryError::FilterMismatch {
                field: "<patch>".to_string(),
                expected: "an object",
            });
        };
        let mut out = Vec::with_capacity(obj.len());
        for (field, v) in obj {
            if v.is_null() {
                out.push((field.clone(), None));
                continue;
            }
            let value = serde_json::from_value::<FilterValue>(v.clone()).map_err(|_| {
                QueryError::FilterMismatch {
                    field: field.clone(),
                    expected: "text, a number, {min,max} or {from,to} with YYYY-MM-DD dates",
                }
            })?;
            out.push((field.clone(), Some(value)));
        }
        Ok(Self(out))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SearchState(String);

impl SearchState {
    pub fn new(term: &str) -> Self {
        Self(term.trim().to_string())
    }

    pub fn term(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub number: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn first() -> Self {
        Self {
            number: 1,
            size: PAGE_SIZE,
        }
    }

    pub fn new(number: i64) -> Result<Self, QueryError> {
        if number < 1 || number > u32::MAX as i64 {
            return Err(QueryError::InvalidPage(number));
        }
        Ok(Self {
            number: number as u32,
            size: PAGE_SIZE,
        })
    }

    /// First row index of the window (0-based, inclusive).
    pub fn from(&self) -> u64 {
        (self.number as u64 - 1) * self.size as u64
    }

    /// Last row index of the window (inclusive).
    pub fn to(&self) -> u64 {
        self.from() + self.size as u64 - 1
    }

    pub fn total_pages(&self, total_count: u64) -> u64 {
        total_count.div_ceil(self.size as u64).max(1)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Column {
    Own(&'static str),
    Related {
        relation: &'static RelationSpec,
        column: &'static str,
    },
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Equals { column: &'static str, value: Scalar },
    /// Case-insensitive substring; `needle` is already lower-cased.
    Contains { column: Column, needle: String },
    AtLeast { column: &'static str, value: Scalar },
    AtMost { column: &'static str, value: Scalar },
    AnyOf(Vec<Predicate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

/// A validated query: every identifier comes from the entity registry.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub spec: &'static EntitySpec,
    /// AND-combined.
    pub predicates: Vec<Predicate>,
    pub window: Option<Window>,
}

impl ListQuery {
    pub fn build(
        spec: &'static EntitySpec,
        filters: &FilterState,
        search: &SearchState,
    ) -> Result<Self, QueryError> {
        let mut predicates = Vec::new();
        for (field, value) in filters.iter() {
            if value.is_unconstrained() {
                continue;
            }
            filter_predicates(spec, field, value, &mut predicates)?;
        }
        if !search.is_empty() && !spec.search.is_empty() {
            let needle = search.term().to_lowercase();
            let any = spec
                .search
                .iter()
                .filter_map(|s| search_column(spec, s))
                .map(|column| Predicate::Contains {
                    column,
                    needle: needle.clone(),
                })
                .collect::<Vec<_>>();
            predicates.push(Predicate::AnyOf(any));
        }
        Ok(Self {
            spec,
            predicates,
            window: None,
        })
    }

    pub fn paged(mut self, page: PageRequest) -> Self {
        self.window = Some(Window {
            offset: page.from(),
            limit: page.size as u64,
        });
        self
    }
}

fn search_column(spec: &'static EntitySpec, field: &SearchField) -> Option<Column> {
    match *field {
        SearchField::Own(col) => Some(Column::Own(col)),
        SearchField::Related { relation, column } => spec
            .relation(relation)
            .map(|relation| Column::Related { relation, column }),
    }
}

fn filter_predicates(
    spec: &'static EntitySpec,
    field: &str,
    value: &FilterValue,
    out: &mut Vec<Predicate>,
) -> Result<(), QueryError> {
    let Some(filter) = spec.filter(field) else {
        return Err(QueryError::UnknownFilter {
            entity: spec.name,
            field: field.to_string(),
        });
    };
    let Some(def) = spec.field(filter.field) else {
        return Err(QueryError::UnknownFilter {
            entity: spec.name,
            field: field.to_string(),
        });
    };
    let column = def.name;
    let mismatch = |expected: &'static str| QueryError::FilterMismatch {
        field: field.to_string(),
        expected,
    };

    match (filter.kind, value) {
        (FilterKind::Equals, v) => {
            let scalar = coerce_scalar(def.ty, v).ok_or_else(|| mismatch(expected_for(def.ty)))?;
            out.push(Predicate::Equals {
                column,
                value: scalar,
            });
        }
        (FilterKind::Contains, FilterValue::Text(s)) => {
            out.push(Predicate::Contains {
                column: Column::Own(column),
                needle: s.trim().to_lowercase(),
            });
        }
        (FilterKind::Contains, _) => return Err(mismatch("text")),
        (FilterKind::NumberRange, FilterValue::Range(r)) => {
            if let (Some(min), Some(max)) = (r.min, r.max) {
                if min > max {
                    return Err(mismatch("a range with min <= max"));
                }
            }
            if let Some(min) = r.min {
                out.push(Predicate::AtLeast {
                    column,
                    value: Scalar::Real(min),
                });
            }
            if let Some(max) = r.max {
                out.push(Predicate::AtMost {
                    column,
                    value: Scalar::Real(max),
                });
            }
        }
        (FilterKind::NumberRange, _) => return Err(mismatch("{min,max}")),
        (FilterKind::DateRange, FilterValue::Dates(r)) => {
            if let (Some(from), Some(to)) = (r.from, r.to) {
                if from > to {
                    return Err(mismatch("a date range with from <= to"));
                }
            }
            if let Some(from) = r.from {
                out.push(Predicate::AtLeast {
                    column,
                    value: Scalar::Text(from.format("%Y-%m-%d").to_string()),
                });
            }
            if let Some(to) = r.to {
                out.push(Predicate::AtMost {
                    column,
                    value: Scalar::Text(to.format("%Y-%m-%d").to_string()),
                });
            }
        }
        (FilterKind::DateRange, _) => return Err(mismatch("{from,to} with YYYY-MM-DD dates")),
    }
    Ok(())
}

fn expected_for(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Text => "text",
        FieldType::Integer => "an integer",
        FieldType::Real => "a number",
        FieldType::Date => "a YYYY-MM-DD date",
    }
}

/// Coerces a filter value to the column type. Numeric text is accepted for
/// numeric columns since select controls usually post strings.
pub fn coerce_scalar(ty: FieldType, value: &FilterValue) -> Option<Scalar> {
    match (ty, value) {
        (FieldType::Text, FilterValue::Text(s)) => Some(Scalar::Text(s.trim().to_string())),
        (FieldType::Integer, FilterValue::Number(n)) => n.as_i64().map(Scalar::Int),
        (FieldType::Integer, FilterValue::Text(s)) => s.trim().parse::<i64>().ok().map(Scalar::Int),
        (FieldType::Real, FilterValue::Number(n)) => n.as_f64().map(Scalar::Real),
        (FieldType::Real, FilterValue::Text(s)) => s.trim().parse::<f64>().ok().map(Scalar::Real),
        (FieldType::Date, FilterValue::Text(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .map(|d| Scalar::Text(d.format("%Y-%m-%d").to_string())),
        _ => None,
    }
}
