//! Summary figures for a screen's stat cards.
//!
//! Projection is pure: it only sees the rows it is given. With the default
//! `page` scope that is the current page, so the cards describe at most
//! `PAGE_SIZE` records even when `totalCount` is larger.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entity::EntitySpec;
use crate::store::Row;

pub const UNKNOWN_BUCKET: &str = "unknown";

#[derive(Debug, Clone, Copy)]
pub enum StatSpec {
    Count {
        key: &'static str,
    },
    CountWhere {
        key: &'static str,
        field: &'static str,
        equals: &'static str,
    },
    CountAtLeast {
        key: &'static str,
        field: &'static str,
        threshold: f64,
    },
    /// Share of rows (0..=100) where `field == equals`.
    Percentage {
        key: &'static str,
        field: &'static str,
        equals: &'static str,
    },
    /// Missing or non-numeric values count as 0 and stay in the denominator.
    Average {
        key: &'static str,
        field: &'static str,
    },
    DistinctValues {
        key: &'static str,
        field: &'static str,
    },
    SumRelationLen {
        key: &'static str,
        relation: &'static str,
    },
    Distribution {
        key: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsScope {
    /// Stats over the rows of the current page only.
    #[default]
    Page,
    /// Stats over every row matching the current filters and search.
    Filtered,
}

impl StatsScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "page" => Some(Self::Page),
            "filtered" => Some(Self::Filtered),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Filtered => "filtered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub entity: &'static str,
    pub scope: StatsScope,
    pub sample_size: usize,
    pub counts: BTreeMap<&'static str, u64>,
    pub ratios: BTreeMap<&'static str, f64>,
    pub averages: BTreeMap<&'static str, f64>,
    pub distributions: BTreeMap<&'static str, BTreeMap<String, u64>>,
}

/// Half-up rounding to one decimal, as shown on the stat cards.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

fn text_of(row: &Row, field: &str) -> Option<String> {
    match row.get(field)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn number_of(row: &Row, field: &str) -> f64 {
    match row.get(field) {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn count_matching(rows: &[Row], field: &str, equals: &str) -> u64 {
    rows.iter()
        .filter(|r| text_of(r, field).as_deref() == Some(equals))
        .count() as u64
}

pub fn project(spec: &'static EntitySpec, rows: &[Row], scope: StatsScope) -> StatsSnapshot {
    let mut snap = StatsSnapshot {
        entity: spec.name,
        scope,
        sample_size: rows.len(),
        counts: BTreeMap::new(),
        ratios: BTreeMap::new(),
        averages: BTreeMap::new(),
        distributions: BTreeMap::new(),
    };

    for stat in spec.stats {
        match *stat {
            StatSpec::Count { key } => {
                snap.counts.insert(key, rows.len() as u64);
            }
            StatSpec::CountWhere { key, field, equals } => {
                snap.counts.insert(key, count_matching(rows, field, equals));
            }
            StatSpec::CountAtLeast {
                key,
                field,
                threshold,
            } => {
                let n = rows
                    .iter()
                    .filter(|r| {
                        r.get(field).map(|v| !v.is_null()).unwrap_or(false)
                            && number_of(r, field) >= threshold
                    })
                    .count();
                snap.counts.insert(key, n as u64);
            }
            StatSpec::Percentage { key, field, equals } => {
                let pct = if rows.is_empty() {
                    0.0
                } else {
                    100.0 * count_matching(rows, field, equals) as f64 / rows.len() as f64
                };
                snap.ratios.insert(key, round_off_1_decimal(pct));
            }
            StatSpec::Average { key, field } => {
                let avg = if rows.is_empty() {
                    0.0
                } else {
                    rows.iter().map(|r| number_of(r, field)).sum::<f64>() / rows.len() as f64
                };
                snap.averages.insert(key, round_off_1_decimal(avg));
            }
            StatSpec::DistinctValues { key, field } => {
                let distinct: BTreeSet<String> =
                    rows.iter().filter_map(|r| text_of(r, field)).collect();
                snap.counts.insert(key, distinct.len() as u64);
            }
            StatSpec::SumRelationLen { key, relation } => {
                let total = rows
                    .iter()
                    .map(|r| {
                        r.get(relation)
                            .and_then(|v| v.as_array())
                            .map(|a| a.len() as u64)
                            .unwrap_or(0)
                    })
                    .sum();
                snap.counts.insert(key, total);
            }
            StatSpec::Distribution { key, field } => {
                let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
                for r in rows {
                    let bucket = text_of(r, field)
                        .filter(|s| !s.trim().is_empty())
                        .unwrap_or_else(|| UNKNOWN_BUCKET.to_string());
                    *buckets.entry(bucket).or_default() += 1;
                }
                snap.distributions.insert(key, buckets);
            }
        }
    }
    snap
}
