use crate::entity::{EntitySpec, ExportSource, FieldType};
use crate::error::ExportError;
use crate::store::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvFormat {
    /// Fixed decimals for real-valued columns, `.` as separator.
    pub decimal_places: usize,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self { decimal_places: 2 }
    }
}

fn csv_quote(s: &str) -> String {
    // Line breaks inside a value would split the record across lines.
    let s = s.replace("\r\n", " ").replace(['\r', '\n'], " ");
    if s.contains(',') || s.contains('"') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s
    }
}

fn render_scalar(v: &serde_json::Value, ty: Option<FieldType>, format: CsvFormat) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Number(n) => match ty {
            Some(FieldType::Real) => n
                .as_f64()
                .map(|f| format!("{:.*}", format.decimal_places, f))
                .unwrap_or_default(),
            _ => match n.as_i64() {
                Some(i) => i.to_string(),
                None => n
                    .as_f64()
                    .map(|f| format!("{:.*}", format.decimal_places, f))
                    .unwrap_or_default(),
            },
        },
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn cell(spec: &EntitySpec, row: &Row, source: ExportSource, format: CsvFormat) -> String {
    match source {
        ExportSource::Own(col) => row
            .get(col)
            .map(|v| render_scalar(v, spec.column_type(col), format))
            .unwrap_or_default(),
        ExportSource::Related { relation, column } => row
            .get(relation)
            .and_then(|r| r.get(column))
            .map(|v| render_scalar(v, None, format))
            .unwrap_or_default(),
        ExportSource::RelatedCount(relation) => row
            .get(relation)
            .and_then(|v| v.as_array())
            .map(|a| a.len().to_string())
            .unwrap_or_else(|| "0".to_string()),
    }
}

/// Serializes the loaded rows: a header line then one line per row.
pub fn export_csv(spec: &EntitySpec, rows: &[Row], format: CsvFormat) -> Result<String, ExportError> {
    if rows.is_empty() {
        return Err(ExportError::EmptyPage);
    }

    let header = spec
        .export
        .iter()
        .map(|c| csv_quote(c.label))
        .collect::<Vec<_>>()
        .join(",");
    let mut csv = String::with_capacity(64 * (rows.len() + 1));
    csv.push_str(&header);
    csv.push('\n');

    for row in rows {
        let line = spec
            .export
            .iter()
            .map(|c| csv_quote(&cell(spec, row, c.source, format)))
            .collect::<Vec<_>>()
            .join(",");
        csv.push_str(&line);
        csv.push('\n');
    }
    Ok(csv)
}

pub fn file_name(prefix: &str, spec: &EntitySpec, page_number: u32) -> String {
    let prefix = prefix.trim();
    let prefix = if prefix.is_empty() { "export" } else { prefix };
    format!("{}-{}-p{}.csv", prefix, spec.name, page_number)
}
