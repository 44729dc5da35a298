//! Per-side join configuration.
//!
//! A [`JoinTableSettings`] describes how one input participates in a join: which columns form
//! the join clauses, which columns appear in the output, and whether unmatched rows are kept.
//! Settings are resolved against the input schema when built and never change afterwards.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use spilljoin_result::{Error, Result};
use spilljoin_table::{DataRow, DataTable};

/// Name of the column appended to condensed rows to carry the row's offset in its input table.
pub const ROW_OFFSET_COLUMN_NAME: &str = "__row_offset";

/// One of the two join inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputTable {
    Left,
    Right,
}

impl InputTable {
    pub const BOTH: [InputTable; 2] = [InputTable::Left, InputTable::Right];

    pub fn other(self) -> Self {
        match self {
            InputTable::Left => InputTable::Right,
            InputTable::Right => InputTable::Left,
        }
    }

    pub fn is_left(self) -> bool {
        self == InputTable::Left
    }

    pub fn is_right(self) -> bool {
        self == InputTable::Right
    }

    /// Position of this side in `[left, right]` pairs.
    pub(crate) fn index(self) -> usize {
        match self {
            InputTable::Left => 0,
            InputTable::Right => 1,
        }
    }
}

impl fmt::Display for InputTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputTable::Left => write!(f, "left"),
            InputTable::Right => write!(f, "right"),
        }
    }
}

/// Join operands that are not regular columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialJoinColumn {
    /// The row key of the input row.
    RowKey,
}

impl SpecialJoinColumn {
    /// Name used to refer to this operand in place of a column name.
    pub fn column_name_indicator(self) -> &'static str {
        match self {
            SpecialJoinColumn::RowKey => "$RowID$",
        }
    }

    /// Reserved column index standing in for this operand in resolved join clauses.
    pub fn column_index_indicator(self) -> isize {
        match self {
            SpecialJoinColumn::RowKey => -100,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        (name == SpecialJoinColumn::RowKey.column_name_indicator()).then_some(Self::RowKey)
    }

    pub fn from_index(index: isize) -> Option<Self> {
        (index == SpecialJoinColumn::RowKey.column_index_indicator()).then_some(Self::RowKey)
    }
}

/// One side of a join clause: a column or a special operand.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum JoinColumn {
    Column(String),
    Special(SpecialJoinColumn),
}

impl JoinColumn {
    pub fn column(name: impl Into<String>) -> Self {
        JoinColumn::Column(name.into())
    }

    pub fn row_key() -> Self {
        JoinColumn::Special(SpecialJoinColumn::RowKey)
    }

    /// Parse a column name, recognising special operand indicators such as `$RowID$`.
    pub fn from_name(name: &str) -> Self {
        match SpecialJoinColumn::from_name(name) {
            Some(special) => JoinColumn::Special(special),
            None => JoinColumn::Column(name.to_string()),
        }
    }

    pub fn is_column(&self) -> bool {
        matches!(self, JoinColumn::Column(_))
    }

    pub fn is_row_key(&self) -> bool {
        matches!(self, JoinColumn::Special(SpecialJoinColumn::RowKey))
    }

    /// The column name, or the indicator name for special operands.
    pub fn name(&self) -> &str {
        match self {
            JoinColumn::Column(name) => name,
            JoinColumn::Special(special) => special.column_name_indicator(),
        }
    }
}

impl From<&str> for JoinColumn {
    fn from(value: &str) -> Self {
        JoinColumn::from_name(value)
    }
}

impl From<String> for JoinColumn {
    fn from(value: String) -> Self {
        JoinColumn::from_name(&value)
    }
}

impl From<SpecialJoinColumn> for JoinColumn {
    fn from(value: SpecialJoinColumn) -> Self {
        JoinColumn::Special(value)
    }
}

impl fmt::Display for JoinColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How one input table takes part in a join.
#[derive(Clone, Debug)]
pub struct JoinTableSettings {
    side: InputTable,
    retain_unmatched: bool,
    join_clauses: Vec<JoinColumn>,
    /// Column index of each join clause operand; special operands use their index indicator.
    join_clause_columns: Vec<isize>,
    include_column_names: Vec<String>,
    include_columns: Vec<usize>,
    /// Sorted, deduplicated union of join and include columns.
    materialize_columns: Vec<usize>,
    row_offset_column: Option<usize>,
    schema: SchemaRef,
    table: Option<Arc<dyn DataTable>>,
}

impl JoinTableSettings {
    /// Resolve join and include columns against `schema`.
    ///
    /// Fails if no join columns are given or if any named column does not exist.
    pub fn new<J, I>(
        side: InputTable,
        retain_unmatched: bool,
        join_clauses: impl IntoIterator<Item = J>,
        include_columns: impl IntoIterator<Item = I>,
        schema: SchemaRef,
    ) -> Result<Self>
    where
        J: Into<JoinColumn>,
        I: Into<String>,
    {
        let join_clauses: Vec<JoinColumn> = join_clauses.into_iter().map(Into::into).collect();
        let include_column_names: Vec<String> =
            include_columns.into_iter().map(Into::into).collect();

        if join_clauses.is_empty() {
            return Err(Error::InvalidArgumentError(format!(
                "no join columns specified for the {side} table"
            )));
        }

        let join_column_names: Vec<&str> = join_clauses
            .iter()
            .filter(|clause| clause.is_column())
            .map(JoinColumn::name)
            .collect();
        validate_column_names(&join_column_names, "join", side, &schema)?;
        let include_names: Vec<&str> = include_column_names.iter().map(String::as_str).collect();
        validate_column_names(&include_names, "include", side, &schema)?;

        let join_clause_columns = join_clauses
            .iter()
            .map(|clause| match clause {
                JoinColumn::Special(special) => Ok(special.column_index_indicator()),
                JoinColumn::Column(name) => Ok(schema.index_of(name)? as isize),
            })
            .collect::<Result<Vec<_>>>()?;
        let include_columns = include_column_names
            .iter()
            .map(|name| Ok(schema.index_of(name)?))
            .collect::<Result<Vec<_>>>()?;

        let mut materialize_columns: Vec<usize> = include_columns
            .iter()
            .copied()
            .chain(
                join_clause_columns
                    .iter()
                    .filter_map(|&idx| usize::try_from(idx).ok()),
            )
            .collect();
        materialize_columns.sort_unstable();
        materialize_columns.dedup();

        Ok(Self {
            side,
            retain_unmatched,
            join_clauses,
            join_clause_columns,
            include_column_names,
            include_columns,
            materialize_columns,
            row_offset_column: None,
            schema,
            table: None,
        })
    }

    /// Resolve the settings against `table` and bind them to it.
    pub fn for_table<J, I>(
        side: InputTable,
        retain_unmatched: bool,
        join_clauses: impl IntoIterator<Item = J>,
        include_columns: impl IntoIterator<Item = I>,
        table: Arc<dyn DataTable>,
    ) -> Result<Self>
    where
        J: Into<JoinColumn>,
        I: Into<String>,
    {
        Self::new(
            side,
            retain_unmatched,
            join_clauses,
            include_columns,
            table.schema(),
        )?
        .with_table(table)
    }

    /// Bind the settings to the table they describe. The table schema must match.
    pub fn with_table(mut self, table: Arc<dyn DataTable>) -> Result<Self> {
        if table.schema().fields() != self.schema.fields() {
            return Err(Error::InvalidArgumentError(format!(
                "the {} table schema does not match the schema the join settings were built for",
                self.side
            )));
        }
        self.table = Some(table);
        Ok(self)
    }

    pub fn side(&self) -> InputTable {
        self.side
    }

    pub fn retains_unmatched(&self) -> bool {
        self.retain_unmatched
    }

    pub fn join_clauses(&self) -> &[JoinColumn] {
        &self.join_clauses
    }

    pub fn num_clauses(&self) -> usize {
        self.join_clauses.len()
    }

    pub fn join_clause_columns(&self) -> &[isize] {
        &self.join_clause_columns
    }

    pub fn include_column_names(&self) -> &[String] {
        &self.include_column_names
    }

    pub fn include_columns(&self) -> &[usize] {
        &self.include_columns
    }

    pub fn materialize_columns(&self) -> &[usize] {
        &self.materialize_columns
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn table(&self) -> Option<&Arc<dyn DataTable>> {
        self.table.as_ref()
    }

    /// Index of the row offset column in condensed settings that store offsets.
    pub fn row_offset_column(&self) -> Option<usize> {
        self.row_offset_column
    }

    /// Number of cells the join has to hold for this side: materialized columns times rows.
    pub fn materialized_cells(&self) -> Option<u64> {
        self.table
            .as_ref()
            .map(|table| table.size() * self.materialize_columns.len() as u64)
    }

    /// Whether the named column is one of the join clause columns.
    pub fn is_join_column(&self, name: &str) -> bool {
        self.join_clauses
            .iter()
            .any(|clause| clause.is_column() && clause.name() == name)
    }

    pub fn is_included(&self, name: &str) -> bool {
        self.include_column_names.iter().any(|inc| inc == name)
    }

    /// Settings over the condensed row layout: only the materialized columns, in table order,
    /// plus a trailing Int64 row offset column if `store_row_offsets` is set.
    ///
    /// The result is not bound to a table.
    pub fn condensed(&self, store_row_offsets: bool) -> Result<Self> {
        let mut fields: Vec<Field> = self
            .materialize_columns
            .iter()
            .map(|&idx| self.schema.field(idx).clone())
            .collect();
        if store_row_offsets {
            fields.push(Field::new(ROW_OFFSET_COLUMN_NAME, DataType::Int64, false));
        }

        let mut condensed = Self::new(
            self.side,
            self.retain_unmatched,
            self.join_clauses.clone(),
            self.include_column_names.clone(),
            Arc::new(Schema::new(fields)),
        )?;
        condensed.row_offset_column =
            store_row_offsets.then_some(self.materialize_columns.len());
        Ok(condensed)
    }

    /// Project an input row onto the layout produced by [`JoinTableSettings::condensed`].
    pub fn condense_row(&self, row: &DataRow, offset: u64, store_row_offset: bool) -> DataRow {
        let mut cells = Vec::with_capacity(self.materialize_columns.len() + 1);
        cells.extend(
            self.materialize_columns
                .iter()
                .map(|&idx| row.cell(idx).clone()),
        );
        if store_row_offset {
            cells.push((offset as i64).into());
        }
        DataRow::new(row.key().clone(), cells)
    }

    /// Offset of a condensed row in its input table, if the layout stores offsets.
    pub fn row_offset(&self, row: &DataRow) -> Option<u64> {
        self.row_offset_column
            .and_then(|col| row.cell(col).as_i64())
            .map(|offset| offset as u64)
    }

    /// Copy of these settings that keeps only the given join clause.
    pub fn using_only_join_clause(&self, clause: usize) -> Result<Self> {
        let join_clause = self.join_clauses.get(clause).ok_or_else(|| {
            Error::InvalidArgumentError(format!(
                "join clause {clause} does not exist, the {} table has {} clauses",
                self.side,
                self.join_clauses.len()
            ))
        })?;

        let mut restricted = Self::new(
            self.side,
            self.retain_unmatched,
            [join_clause.clone()],
            self.include_column_names.clone(),
            Arc::clone(&self.schema),
        )?;
        restricted.row_offset_column = self.row_offset_column;
        restricted.table = self.table.clone();
        Ok(restricted)
    }
}

/// Check that every name exists in `schema`, listing all unknown and available names otherwise.
fn validate_column_names(
    names: &[&str],
    kind: &str,
    side: InputTable,
    schema: &Schema,
) -> Result<()> {
    let unknown: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| schema.index_of(name).is_err())
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }

    let available: Vec<&str> = schema
        .fields()
        .iter()
        .map(|field| field.name().as_str())
        .collect();
    Err(Error::InvalidArgumentError(format!(
        "the {side} input table has no {kind} column(s) named [{}]; available columns: [{}]",
        unknown.join(", "),
        available.join(", ")
    )))
}
