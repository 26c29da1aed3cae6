//! In-memory table threaded through the pipeline stages.

use std::collections::HashSet;

use crate::data::Value;

pub type Cell = Option<Value>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn non_null(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().flatten()
    }

    pub fn non_null_count(&self) -> usize {
        self.non_null().count()
    }

    pub fn null_count(&self) -> usize {
        self.values.len() - self.non_null_count()
    }

    pub fn distinct_count(&self) -> usize {
        self.non_null().collect::<HashSet<_>>().len()
    }

    pub fn is_all_null(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Representation tag: the shared cell variant, `null` when the column has
    /// no values, `mixed` otherwise.
    pub fn representation(&self) -> &'static str {
        let mut tags = self.non_null().map(Value::representation);
        match tags.next() {
            None => "null",
            Some(first) => {
                if tags.all(|tag| tag == first) {
                    first
                } else {
                    "mixed"
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub columns: Vec<Column>,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Builds a dataset from row-major cells. Short rows are padded with nulls
    /// and cells beyond the header are ignored.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let mut columns = headers
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
            .collect::<Vec<_>>();
        for row in rows {
            let mut cells = row.into_iter();
            for column in columns.iter_mut() {
                column.values.push(cells.next().flatten());
            }
        }
        Self { columns }
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn row(&self, index: usize) -> Vec<Option<&Value>> {
        self.columns
            .iter()
            .map(|column| column.values.get(index).and_then(Option::as_ref))
            .collect()
    }

    pub fn total_cells(&self) -> usize {
        self.row_count() * self.column_count()
    }

    pub fn non_null_cells(&self) -> usize {
        self.columns.iter().map(Column::non_null_count).sum()
    }

    /// Keeps only rows whose flag is set; row order is preserved.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for column in self.columns.iter_mut() {
            let mut flags = keep.iter();
            column
                .values
                .retain(|_| flags.next().copied().unwrap_or(true));
        }
    }

    /// Copy of the rows in `range`, clamped to the row count.
    pub fn slice(&self, start: usize, len: usize) -> Dataset {
        let rows = self.row_count();
        let start = start.min(rows);
        let end = start.saturating_add(len).min(rows);
        Dataset::new(
            self.columns
                .iter()
                .map(|column| Column::new(column.name.clone(), column.values[start..end].to_vec()))
                .collect(),
        )
    }

    pub fn head(&self, n: usize) -> Dataset {
        self.slice(0, n)
    }

    pub fn tail(&self, n: usize) -> Dataset {
        let rows = self.row_count();
        self.slice(rows.saturating_sub(n), n)
    }

    /// Row-major display strings, nulls rendered as empty cells.
    pub fn display_rows(&self) -> Vec<Vec<String>> {
        (0..self.row_count())
            .map(|idx| {
                self.row(idx)
                    .into_iter()
                    .map(|cell| cell.map(Value::as_display).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}
