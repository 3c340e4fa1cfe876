//! Tabular store — an immutable in-memory table and a small structured query
//! language over it.
//!
//! The store is loaded once (CSV with a header row, or a JSON array of flat
//! objects) and shared read-only behind an `Arc`, so any number of
//! interactions can query it concurrently.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Infer a cell from raw text: empty → Null, numeric → Number.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(trimmed.to_string()),
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            Value::String(s) => Self::Text(s.clone()),
            Value::Bool(b) => Self::Text(b.to_string()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Errors from loading or querying the table.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse table data: {0}")]
    Parse(String),

    #[error("Unknown column '{column}'. Available columns: {available}")]
    UnknownColumn { column: String, available: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregateOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Aggregate {
    pub op: AggregateOp,
    /// Column to aggregate; `"*"` is allowed for `count`
    pub column: String,
}

impl Aggregate {
    /// Name of the output column, e.g. `sum(sales)`.
    pub fn output_name(&self) -> String {
        format!("{}({})", self.op.as_str(), self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

/// A structured query over the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableQuery {
    /// Columns to return; empty = all (ignored when aggregating)
    #[serde(default)]
    pub columns: Vec<String>,

    /// Row filters, all of which must match
    #[serde(default)]
    pub filters: Vec<Filter>,

    #[serde(default)]
    pub group_by: Option<String>,

    #[serde(default)]
    pub aggregate: Option<Aggregate>,

    /// Column of the result to sort by
    #[serde(default)]
    pub order_by: Option<OrderBy>,

    #[serde(default)]
    pub limit: Option<usize>,
}

/// The rows produced by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ResultSet {
    /// Render as a pipe-delimited text table, keeping at most `max_rows` rows.
    pub fn render(&self, max_rows: usize) -> String {
        let mut out = self.columns.join(" | ");
        out.push('\n');
        out.push_str(&vec!["---"; self.columns.len()].join(" | "));
        for row in self.rows.iter().take(max_rows) {
            out.push('\n');
            let cells: Vec<String> = row
                .iter()
                .map(|c| c.to_string().replace('|', "/"))
                .collect();
            out.push_str(&cells.join(" | "));
        }
        if self.rows.len() > max_rows {
            out.push_str(&format!("\n({} more rows)", self.rows.len() - max_rows));
        }
        out
    }

    /// Find and parse the first table produced by [`ResultSet::render`] in `text`.
    pub fn parse_rendered(text: &str) -> Option<Self> {
        let lines: Vec<&str> = text.lines().collect();
        let header_idx = lines.windows(2).position(|pair| {
            let sep = pair[1].trim();
            !pair[0].trim().is_empty()
                && !sep.is_empty()
                && sep.split('|').all(|s| s.trim() == "---")
        })?;

        let split = |line: &str| -> Vec<String> {
            line.split('|').map(|s| s.trim().to_string()).collect()
        };
        let columns = split(lines[header_idx]);

        let rows = lines[header_idx + 2..]
            .iter()
            .take_while(|l| !l.trim().is_empty() && !is_more_rows_trailer(l))
            .map(|l| split(l).iter().map(|c| Cell::infer(c)).collect::<Vec<_>>())
            .filter(|r| r.len() == columns.len())
            .collect();

        Some(Self { columns, rows })
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(Cell::to_json))
                    .collect();
                Value::Object(map)
            })
            .collect()
    }
}

/// An immutable in-memory table.
#[derive(Debug, Clone)]
pub struct TableStore {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl TableStore {
    /// A table with no columns or rows.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Load a table from a `.csv` or `.json` file.
    pub fn load(path: &Path, name: impl Into<String>) -> Result<Self, TableError> {
        let content = std::fs::read_to_string(path).map_err(|e| TableError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(name, &content),
            _ => Self::from_csv_str(name, &content),
        }
    }

    /// Parse CSV text with a header row. Quoted fields may contain commas,
    /// newlines and doubled quotes.
    pub fn from_csv_str(name: impl Into<String>, content: &str) -> Result<Self, TableError> {
        let mut records = parse_csv(content)?.into_iter();
        let columns: Vec<String> = records
            .next()
            .ok_or_else(|| TableError::Parse("CSV has no header row".into()))?
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (i, record) in records.enumerate() {
            if record.len() == 1 && record[0].trim().is_empty() {
                continue;
            }
            if record.len() != columns.len() {
                return Err(TableError::Parse(format!(
                    "row {} has {} fields, expected {}",
                    i + 2,
                    record.len(),
                    columns.len()
                )));
            }
            rows.push(record.iter().map(|f| Cell::infer(f)).collect());
        }

        Ok(Self {
            name: name.into(),
            columns,
            rows,
        })
    }

    /// Parse a JSON array of flat objects. Columns are the union of keys in
    /// first-seen order; missing keys become nulls.
    pub fn from_json_str(name: impl Into<String>, content: &str) -> Result<Self, TableError> {
        let value: Value =
            serde_json::from_str(content).map_err(|e| TableError::Parse(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(TableError::Parse("expected a JSON array of objects".into()));
        };

        let mut columns: Vec<String> = Vec::new();
        let mut objects = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(map) = item else {
                return Err(TableError::Parse("every array element must be an object".into()));
            };
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
            objects.push(map);
        }

        let rows = objects
            .iter()
            .map(|obj| {
                columns
                    .iter()
                    .map(|c| obj.get(c).map(Cell::from_json).unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();

        Ok(Self {
            name: name.into(),
            columns,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A short description of the table for prompts: name, row count, and
    /// each column with its inferred type and an example value.
    pub fn describe(&self) -> String {
        let mut out = format!("Table `{}` ({} rows). Columns:", self.name, self.rows.len());
        for (i, column) in self.columns.iter().enumerate() {
            let sample = self.rows.iter().map(|r| &r[i]).find(|c| **c != Cell::Null);
            let kind = match sample {
                Some(Cell::Number(_)) => "number",
                Some(Cell::Text(_)) => "text",
                _ => "empty",
            };
            let example = sample.map(|c| c.to_string()).unwrap_or_default();
            out.push_str(&format!("\n- {column} ({kind}), e.g. {example}"));
        }
        out
    }

    fn column_index(&self, column: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| TableError::UnknownColumn {
                column: column.to_string(),
                available: self.columns.join(", "),
            })
    }

    /// Execute a structured query.
    pub fn query(&self, query: &TableQuery) -> Result<ResultSet, TableError> {
        let filters = query
            .filters
            .iter()
            .map(|f| Ok((self.column_index(&f.column)?, f)))
            .collect::<Result<Vec<_>, TableError>>()?;

        let matching: Vec<&Vec<Cell>> = self
            .rows
            .iter()
            .filter(|row| filters.iter().all(|(idx, f)| matches_filter(&row[*idx], f)))
            .collect();

        let mut result = match (&query.aggregate, &query.group_by) {
            (Some(agg), group_by) => self.aggregate(&matching, agg, group_by.as_deref())?,
            (None, Some(_)) => {
                return Err(TableError::InvalidQuery(
                    "group_by requires an aggregate".into(),
                ));
            }
            (None, None) => self.project(&matching, &query.columns)?,
        };

        if let Some(order) = &query.order_by {
            let idx = result
                .columns
                .iter()
                .position(|c| *c == order.column)
                .ok_or_else(|| TableError::UnknownColumn {
                    column: order.column.clone(),
                    available: result.columns.join(", "),
                })?;
            result.rows.sort_by(|a, b| {
                let ord = a[idx].total_cmp(&b[idx]);
                if order.descending { ord.reverse() } else { ord }
            });
        }

        if let Some(limit) = query.limit {
            result.rows.truncate(limit);
        }

        Ok(result)
    }

    fn project(&self, rows: &[&Vec<Cell>], columns: &[String]) -> Result<ResultSet, TableError> {
        if columns.is_empty() {
            return Ok(ResultSet {
                columns: self.columns.clone(),
                rows: rows.iter().map(|r| (*r).clone()).collect(),
            });
        }

        let indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResultSet {
            columns: columns.to_vec(),
            rows: rows
                .iter()
                .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        })
    }

    fn aggregate(
        &self,
        rows: &[&Vec<Cell>],
        agg: &Aggregate,
        group_by: Option<&str>,
    ) -> Result<ResultSet, TableError> {
        let value_idx = if agg.column == "*" {
            if agg.op != AggregateOp::Count {
                return Err(TableError::InvalidQuery(format!(
                    "'*' is only valid with count, not {}",
                    agg.op.as_str()
                )));
            }
            None
        } else {
            Some(self.column_index(&agg.column)?)
        };

        let Some(group_column) = group_by else {
            let value = compute_aggregate(agg.op, rows, value_idx);
            return Ok(ResultSet {
                columns: vec![agg.output_name()],
                rows: vec![vec![value]],
            });
        };

        let group_idx = self.column_index(group_column)?;
        let mut order: Vec<Cell> = Vec::new();
        let mut groups: HashMap<String, Vec<&Vec<Cell>>> = HashMap::new();
        for row in rows {
            let key = row[group_idx].to_string();
            if !groups.contains_key(&key) {
                order.push(row[group_idx].clone());
            }
            groups.entry(key).or_default().push(row);
        }

        let result_rows = order
            .into_iter()
            .map(|key_cell| {
                let members = groups
                    .get(&key_cell.to_string())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let value = compute_aggregate(agg.op, members, value_idx);
                vec![key_cell, value]
            })
            .collect();

        Ok(ResultSet {
            columns: vec![group_column.to_string(), agg.output_name()],
            rows: result_rows,
        })
    }
}

fn compute_aggregate(op: AggregateOp, rows: &[&Vec<Cell>], idx: Option<usize>) -> Cell {
    let Some(idx) = idx else {
        return Cell::Number(rows.len() as f64);
    };

    if op == AggregateOp::Count {
        let count = rows.iter().filter(|r| r[idx] != Cell::Null).count();
        return Cell::Number(count as f64);
    }

    let values: Vec<f64> = rows.iter().filter_map(|r| r[idx].as_f64()).collect();
    if values.is_empty() {
        return Cell::Null;
    }

    let value = match op {
        AggregateOp::Sum => values.iter().sum(),
        AggregateOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregateOp::Count => values.len() as f64,
    };
    Cell::Number(value)
}

fn matches_filter(cell: &Cell, filter: &Filter) -> bool {
    let expected = match &filter.value {
        Value::String(s) => match (cell, s.trim().parse::<f64>()) {
            (Cell::Number(_), Ok(n)) => Cell::Number(n),
            _ => Cell::Text(s.clone()),
        },
        other => Cell::from_json(other),
    };

    if filter.op == FilterOp::Contains {
        return cell
            .to_string()
            .to_lowercase()
            .contains(&expected.to_string().to_lowercase());
    }

    // Ordering comparisons only make sense between values of the same kind
    let comparable = matches!(
        (cell, &expected),
        (Cell::Number(_), Cell::Number(_))
            | (Cell::Text(_), Cell::Text(_))
            | (Cell::Null, Cell::Null)
    );
    let ord = cell.total_cmp(&expected);

    match filter.op {
        FilterOp::Eq => comparable && ord == Ordering::Equal,
        FilterOp::Ne => !(comparable && ord == Ordering::Equal),
        FilterOp::Gt => comparable && ord == Ordering::Greater,
        FilterOp::Gte => comparable && ord != Ordering::Less,
        FilterOp::Lt => comparable && ord == Ordering::Less,
        FilterOp::Lte => comparable && ord != Ordering::Greater,
        FilterOp::Contains => unreachable!("handled above"),
    }
}

/// Whether `line` is exactly the `(N more rows)` trailer written by `render`.
fn is_more_rows_trailer(line: &str) -> bool {
    line.trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(" more rows)"))
        .is_some_and(|count| count.parse::<usize>().is_ok())
}

/// Split CSV text into records of raw fields.
fn parse_csv(content: &str) -> Result<Vec<Vec<String>>, TableError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            // Whitespace before an opening quote is padding, not content
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(TableError::Parse("unterminated quoted field".into()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}
