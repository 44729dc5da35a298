//! Join specification: everything that determines the output of a join except the inputs.
//!
//! A [`JoinSpecification`] combines the settings of both sides with the join mode, output
//! ordering, row key policy and column naming. It is built once through
//! [`JoinSpecificationBuilder`] and then only read. The projection helpers here turn input rows
//! into output rows; they work on whatever row layout the bound settings describe, which lets
//! the join run over condensed rows with a spec derived via [`JoinSpecification::with_settings`].

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use rustc_hash::FxHashSet;
use spilljoin_result::{Error, Result};
use spilljoin_table::{DataCell, DataRow, RowKey};

use crate::settings::{InputTable, JoinColumn, JoinTableSettings};

/// Order in which output rows are produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum OutputRowOrder {
    /// Whatever order is cheapest. May differ between runs that spill differently.
    #[default]
    Arbitrary,
    /// Reproducible order: matches by probe row then hash row, then unmatched rows by offset.
    Deterministic,
    /// Matches by left row then right row, then left unmatched, then right unmatched.
    LeftRight,
}

/// How join values are compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DataCellComparisonMode {
    /// Values match only if they have the same type and value.
    #[default]
    Strict,
    /// Values match if their string renderings are equal.
    AsString,
    /// Numeric values are compared as 64-bit integers, floats truncated toward zero.
    NumericAsLong,
}

/// Where unmatched rows go when they are retained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum UnmatchedOutput {
    /// Unmatched rows of each side form their own table with that side's include columns.
    #[default]
    SeparateTables,
    /// Unmatched rows are padded with missing cells and appended to the match table.
    SingleTable,
}

/// Signature of a user supplied row key function. Either key may be absent for unmatched rows.
pub type CustomRowKeyFn = Arc<dyn Fn(Option<&RowKey>, Option<&RowKey>) -> RowKey + Send + Sync>;

/// Renames an output column whose name is already taken.
pub type ColumnNameDisambiguator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Rendering of the absent side when concatenating row keys of unmatched rows.
const ABSENT_KEY_PLACEHOLDER: &str = "?";

/// How output row keys are created.
#[derive(Clone)]
pub enum RowKeyStrategy {
    /// `Row0`, `Row1`, ... numbered per output table.
    Sequence,
    /// Left and right key joined by the separator; an absent side renders as `?`.
    Concatenate(String),
    /// The left key if present, otherwise the right key.
    KeepOriginal,
    Custom(CustomRowKeyFn),
}

impl RowKeyStrategy {
    pub fn concatenate(separator: impl Into<String>) -> Self {
        RowKeyStrategy::Concatenate(separator.into())
    }

    pub fn custom(
        key_fn: impl Fn(Option<&RowKey>, Option<&RowKey>) -> RowKey + Send + Sync + 'static,
    ) -> Self {
        RowKeyStrategy::Custom(Arc::new(key_fn))
    }

    pub fn is_keep_original(&self) -> bool {
        matches!(self, RowKeyStrategy::KeepOriginal)
    }

    /// A fresh key generator; use one per output table.
    pub fn generator(&self) -> RowKeyGenerator {
        RowKeyGenerator {
            strategy: self.clone(),
            next_index: 0,
        }
    }
}

impl Default for RowKeyStrategy {
    fn default() -> Self {
        RowKeyStrategy::Sequence
    }
}

impl fmt::Debug for RowKeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKeyStrategy::Sequence => write!(f, "Sequence"),
            RowKeyStrategy::Concatenate(sep) => f.debug_tuple("Concatenate").field(sep).finish(),
            RowKeyStrategy::KeepOriginal => write!(f, "KeepOriginal"),
            RowKeyStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Stateful row key source for one output table.
#[derive(Debug)]
pub struct RowKeyGenerator {
    strategy: RowKeyStrategy,
    next_index: u64,
}

impl RowKeyGenerator {
    pub fn next_key(&mut self, left: Option<&RowKey>, right: Option<&RowKey>) -> RowKey {
        let index = self.next_index;
        self.next_index += 1;
        match &self.strategy {
            RowKeyStrategy::Sequence => RowKey::sequence(index),
            RowKeyStrategy::Concatenate(separator) => {
                let left = left.map_or(ABSENT_KEY_PLACEHOLDER, RowKey::as_str);
                let right = right.map_or(ABSENT_KEY_PLACEHOLDER, RowKey::as_str);
                RowKey::new(format!("{left}{separator}{right}"))
            }
            RowKeyStrategy::KeepOriginal => left
                .or(right)
                .cloned()
                .unwrap_or_else(|| RowKey::sequence(index)),
            RowKeyStrategy::Custom(key_fn) => key_fn(left, right),
        }
    }
}

/// The renaming used when no disambiguator is configured: `name` becomes `name (#1)`.
pub fn default_column_name_disambiguator() -> ColumnNameDisambiguator {
    Arc::new(|name: &str| format!("{name} (#1)"))
}

/// Rename `name` until `is_taken` no longer holds.
///
/// A disambiguator that hands back its input (ignoring surrounding whitespace) would loop
/// forever; in that case the name is appended to itself instead.
pub fn disambiguate_column_name(
    name: &str,
    is_taken: impl Fn(&str) -> bool,
    disambiguator: &dyn Fn(&str) -> String,
) -> String {
    let mut name = name.to_string();
    while is_taken(&name) {
        let renamed = disambiguator(&name);
        name = if renamed.trim() == name {
            format!("{name}{name}")
        } else {
            renamed
        };
    }
    name
}

/// Whether keeping original row keys can produce duplicate keys in an output table.
///
/// `row_keys_equal` states that matched rows always have identical left and right keys.
/// Unmatched rows of one side keep unique keys; mixing both sides, or matches with unmatched
/// rows, is only safe when the keys of a match coincide with the keys of its inputs and the two
/// unmatched sides do not end up in the same table.
pub fn keep_row_keys_legal(
    retain_matched: bool,
    retain_left_unmatched: bool,
    retain_right_unmatched: bool,
    unmatched_output: UnmatchedOutput,
    row_keys_equal: bool,
) -> bool {
    let separate = unmatched_output == UnmatchedOutput::SeparateTables;
    match (
        retain_matched,
        retain_left_unmatched,
        retain_right_unmatched,
    ) {
        (false, false, false) | (false, true, false) | (false, false, true) => true,
        (false, true, true) => separate,
        (true, true, true) => separate && row_keys_equal,
        (true, _, _) => row_keys_equal,
    }
}

/// Immutable description of a join.
#[derive(Clone)]
pub struct JoinSpecification {
    settings: [JoinTableSettings; 2],
    conjunctive: bool,
    retain_matched: bool,
    merge_join_columns: bool,
    comparison_mode: DataCellComparisonMode,
    output_row_order: OutputRowOrder,
    unmatched_output: UnmatchedOutput,
    row_key_strategy: RowKeyStrategy,
    column_name_disambiguator: ColumnNameDisambiguator,
    /// Per side, the columns of that side's part of the match table.
    match_includes: [Vec<usize>; 2],
    /// For each left match include, the right columns merged into it.
    merged_right_columns: Vec<Vec<usize>>,
    /// Per side, the include columns in table order, as written to unmatched tables.
    outer_includes: [Vec<usize>; 2],
    match_schema: SchemaRef,
    unmatched_schemas: [SchemaRef; 2],
}

impl JoinSpecification {
    pub fn builder(left: JoinTableSettings, right: JoinTableSettings) -> JoinSpecificationBuilder {
        JoinSpecificationBuilder::new(left, right)
    }

    /// A builder preloaded with every option of this spec.
    pub fn to_builder(&self) -> JoinSpecificationBuilder {
        let [left, right] = self.settings.clone();
        JoinSpecificationBuilder {
            left,
            right,
            conjunctive: self.conjunctive,
            retain_matched: self.retain_matched,
            merge_join_columns: self.merge_join_columns,
            comparison_mode: self.comparison_mode,
            output_row_order: self.output_row_order,
            unmatched_output: self.unmatched_output,
            row_key_strategy: self.row_key_strategy.clone(),
            column_name_disambiguator: Arc::clone(&self.column_name_disambiguator),
        }
    }

    /// The same join over different settings, e.g. the condensed layouts used while joining.
    pub fn with_settings(&self, left: JoinTableSettings, right: JoinTableSettings) -> Result<Self> {
        let mut builder = self.to_builder();
        builder.left = left;
        builder.right = right;
        builder.build()
    }

    /// The same join restricted to a single clause on both sides.
    pub fn using_only_join_clause(&self, clause: usize) -> Result<Self> {
        self.with_settings(
            self.settings[0].using_only_join_clause(clause)?,
            self.settings[1].using_only_join_clause(clause)?,
        )
    }

    pub fn settings(&self, side: InputTable) -> &JoinTableSettings {
        &self.settings[side.index()]
    }

    pub fn left_settings(&self) -> &JoinTableSettings {
        &self.settings[0]
    }

    pub fn right_settings(&self) -> &JoinTableSettings {
        &self.settings[1]
    }

    pub fn num_clauses(&self) -> usize {
        self.settings[0].num_clauses()
    }

    /// Whether all clauses must hold (`true`) or at least one (`false`).
    pub fn is_conjunctive(&self) -> bool {
        self.conjunctive
    }

    /// Conjunctive, or disjunctive over a single clause, which means the same.
    pub fn is_effectively_conjunctive(&self) -> bool {
        self.conjunctive || self.num_clauses() == 1
    }

    pub fn retains_matched(&self) -> bool {
        self.retain_matched
    }

    pub fn retains_unmatched(&self, side: InputTable) -> bool {
        self.settings(side).retains_unmatched()
    }

    /// Whether the join produces any output at all.
    pub fn retains_anything(&self) -> bool {
        self.retain_matched || InputTable::BOTH.iter().any(|&side| self.retains_unmatched(side))
    }

    pub fn merges_join_columns(&self) -> bool {
        self.merge_join_columns
    }

    pub fn comparison_mode(&self) -> DataCellComparisonMode {
        self.comparison_mode
    }

    pub fn output_row_order(&self) -> OutputRowOrder {
        self.output_row_order
    }

    pub fn unmatched_output(&self) -> UnmatchedOutput {
        self.unmatched_output
    }

    pub fn row_key_strategy(&self) -> &RowKeyStrategy {
        &self.row_key_strategy
    }

    /// Whether every match has equal left and right row keys: some clause joins row key to
    /// row key and that clause must hold for every match.
    pub fn row_keys_equal_when_matched(&self) -> bool {
        self.is_effectively_conjunctive()
            && self.settings[0]
                .join_clauses()
                .iter()
                .zip(self.settings[1].join_clauses())
                .any(|(left, right)| left.is_row_key() && right.is_row_key())
    }

    /// Whether [`RowKeyStrategy::KeepOriginal`] yields unique keys for the given output mode.
    pub fn keeps_row_keys_legal(&self, unmatched_output: UnmatchedOutput) -> bool {
        keep_row_keys_legal(
            self.retain_matched,
            self.retains_unmatched(InputTable::Left),
            self.retains_unmatched(InputTable::Right),
            unmatched_output,
            self.row_keys_equal_when_matched(),
        )
    }

    /// Columns of `side` that appear in the match table, as indices into that side's schema.
    pub fn match_table_includes(&self, side: InputTable) -> &[usize] {
        &self.match_includes[side.index()]
    }

    /// Schema of the table of matches, also used for the single-table output.
    pub fn spec_for_match_table(&self) -> SchemaRef {
        Arc::clone(&self.match_schema)
    }

    /// Schema of the table of unmatched rows of `side` in separate-table output.
    pub fn spec_for_unmatched(&self, side: InputTable) -> SchemaRef {
        Arc::clone(&self.unmatched_schemas[side.index()])
    }

    /// Output row for a matching pair.
    pub fn row_join(
        &self,
        left: &DataRow,
        right: &DataRow,
        keys: &mut RowKeyGenerator,
    ) -> DataRow {
        let mut cells = Vec::with_capacity(self.match_schema.fields().len());
        let consensus = self.merge_join_columns && !self.conjunctive;
        for (pos, &col) in self.match_includes[0].iter().enumerate() {
            let cell = left.cell(col);
            let partners = &self.merged_right_columns[pos];
            if consensus && partners.iter().any(|&right_col| right.cell(right_col) != cell) {
                cells.push(DataCell::Missing);
            } else {
                cells.push(cell.clone());
            }
        }
        cells.extend(
            self.match_includes[1]
                .iter()
                .map(|&col| right.cell(col).clone()),
        );
        DataRow::new(keys.next_key(Some(left.key()), Some(right.key())), cells)
    }

    /// An unmatched left row in match table layout; right columns are missing.
    pub fn left_to_single_table_format(
        &self,
        row: &DataRow,
        keys: &mut RowKeyGenerator,
    ) -> DataRow {
        let mut cells = Vec::with_capacity(self.match_schema.fields().len());
        cells.extend(self.match_includes[0].iter().map(|&col| row.cell(col).clone()));
        cells.resize(self.match_schema.fields().len(), DataCell::Missing);
        DataRow::new(keys.next_key(Some(row.key()), None), cells)
    }

    /// An unmatched right row in match table layout.
    ///
    /// Left columns are missing, except merged join columns when join columns are merged: they
    /// take the value their right partners agree on.
    pub fn right_to_single_table_format(
        &self,
        row: &DataRow,
        keys: &mut RowKeyGenerator,
    ) -> DataRow {
        let mut cells = Vec::with_capacity(self.match_schema.fields().len());
        for partners in &self.merged_right_columns {
            let cell = if self.merge_join_columns {
                consensus(row, partners)
            } else {
                DataCell::Missing
            };
            cells.push(cell);
        }
        cells.extend(
            self.match_includes[1]
                .iter()
                .map(|&col| row.cell(col).clone()),
        );
        DataRow::new(keys.next_key(None, Some(row.key())), cells)
    }

    /// An unmatched row projected to its side's include columns in table order, keeping its
    /// row key.
    pub fn row_project_outer(&self, side: InputTable, row: &DataRow) -> DataRow {
        let cells = self.outer_includes[side.index()]
            .iter()
            .map(|&col| row.cell(col).clone())
            .collect();
        DataRow::new(row.key().clone(), cells)
    }

    /// Names of the join columns on the other side that `name` on `side` is joined to.
    fn join_partners(&self, side: InputTable, name: &str) -> Vec<String> {
        join_partners(
            &self.settings[side.index()],
            &self.settings[side.other().index()],
            name,
        )
    }
}

impl fmt::Debug for JoinSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinSpecification")
            .field("left", &self.settings[0].join_clauses())
            .field("right", &self.settings[1].join_clauses())
            .field("conjunctive", &self.conjunctive)
            .field("retain_matched", &self.retain_matched)
            .field("merge_join_columns", &self.merge_join_columns)
            .field("comparison_mode", &self.comparison_mode)
            .field("output_row_order", &self.output_row_order)
            .field("unmatched_output", &self.unmatched_output)
            .field("row_key_strategy", &self.row_key_strategy)
            .finish_non_exhaustive()
    }
}

/// The value all `columns` of `row` agree on, or missing if they disagree or there are none.
fn consensus(row: &DataRow, columns: &[usize]) -> DataCell {
    let mut values = columns.iter().map(|&col| row.cell(col));
    let Some(first) = values.next() else {
        return DataCell::Missing;
    };
    if values.all(|value| value == first) {
        first.clone()
    } else {
        DataCell::Missing
    }
}

fn join_partners(own: &JoinTableSettings, other: &JoinTableSettings, name: &str) -> Vec<String> {
    let mut partners: Vec<String> = Vec::new();
    for (mine, theirs) in own.join_clauses().iter().zip(other.join_clauses()) {
        if let (JoinColumn::Column(mine), JoinColumn::Column(theirs)) = (mine, theirs)
            && mine == name
            && !partners.contains(theirs)
        {
            partners.push(theirs.clone());
        }
    }
    partners
}

/// Builder for [`JoinSpecification`].
#[derive(Clone)]
pub struct JoinSpecificationBuilder {
    left: JoinTableSettings,
    right: JoinTableSettings,
    conjunctive: bool,
    retain_matched: bool,
    merge_join_columns: bool,
    comparison_mode: DataCellComparisonMode,
    output_row_order: OutputRowOrder,
    unmatched_output: UnmatchedOutput,
    row_key_strategy: RowKeyStrategy,
    column_name_disambiguator: ColumnNameDisambiguator,
}

impl JoinSpecificationBuilder {
    /// Start from an inner, conjunctive join with concatenated row keys.
    pub fn new(left: JoinTableSettings, right: JoinTableSettings) -> Self {
        Self {
            left,
            right,
            conjunctive: true,
            retain_matched: true,
            merge_join_columns: false,
            comparison_mode: DataCellComparisonMode::default(),
            output_row_order: OutputRowOrder::default(),
            unmatched_output: UnmatchedOutput::default(),
            row_key_strategy: RowKeyStrategy::default(),
            column_name_disambiguator: default_column_name_disambiguator(),
        }
    }

    pub fn conjunctive(mut self, conjunctive: bool) -> Self {
        self.conjunctive = conjunctive;
        self
    }

    pub fn retain_matched(mut self, retain_matched: bool) -> Self {
        self.retain_matched = retain_matched;
        self
    }

    pub fn merge_join_columns(mut self, merge: bool) -> Self {
        self.merge_join_columns = merge;
        self
    }

    pub fn comparison_mode(mut self, mode: DataCellComparisonMode) -> Self {
        self.comparison_mode = mode;
        self
    }

    pub fn output_row_order(mut self, order: OutputRowOrder) -> Self {
        self.output_row_order = order;
        self
    }

    pub fn unmatched_output(mut self, output: UnmatchedOutput) -> Self {
        self.unmatched_output = output;
        self
    }

    pub fn row_key_strategy(mut self, strategy: RowKeyStrategy) -> Self {
        self.row_key_strategy = strategy;
        self
    }

    pub fn column_name_disambiguator(
        mut self,
        disambiguator: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.column_name_disambiguator = Arc::new(disambiguator);
        self
    }

    /// Restrict both sides to one clause.
    pub fn using_only_join_clause(mut self, clause: usize) -> Result<Self> {
        self.left = self.left.using_only_join_clause(clause)?;
        self.right = self.right.using_only_join_clause(clause)?;
        Ok(self)
    }

    pub fn build(self) -> Result<JoinSpecification> {
        if self.left.side() != InputTable::Left {
            return Err(Error::InvalidArgumentError(
                "the left join table settings are declared for the right table".to_string(),
            ));
        }
        if self.right.side() != InputTable::Right {
            return Err(Error::InvalidArgumentError(
                "the right join table settings are declared for the left table".to_string(),
            ));
        }
        if self.left.num_clauses() != self.right.num_clauses() {
            return Err(Error::InvalidArgumentError(format!(
                "the left table has {} join clauses but the right table has {}",
                self.left.num_clauses(),
                self.right.num_clauses()
            )));
        }

        let (match_includes, merged_right_columns) = if self.merge_join_columns {
            merged_match_includes(&self.left, &self.right)?
        } else {
            (
                [
                    self.left.include_columns().to_vec(),
                    self.right.include_columns().to_vec(),
                ],
                vec![Vec::new(); self.left.include_columns().len()],
            )
        };

        let mut spec = JoinSpecification {
            settings: [self.left, self.right],
            conjunctive: self.conjunctive,
            retain_matched: self.retain_matched,
            merge_join_columns: self.merge_join_columns,
            comparison_mode: self.comparison_mode,
            output_row_order: self.output_row_order,
            unmatched_output: self.unmatched_output,
            row_key_strategy: self.row_key_strategy,
            column_name_disambiguator: self.column_name_disambiguator,
            match_includes,
            merged_right_columns,
            outer_includes: [Vec::new(), Vec::new()],
            match_schema: Arc::new(Schema::empty()),
            unmatched_schemas: [Arc::new(Schema::empty()), Arc::new(Schema::empty())],
        };

        if spec.row_key_strategy.is_keep_original()
            && !spec.keeps_row_keys_legal(spec.unmatched_output)
        {
            return Err(Error::InvalidArgumentError(
                "original row keys cannot be kept: the output could contain duplicate row keys"
                    .to_string(),
            ));
        }

        spec.outer_includes = InputTable::BOTH.map(|side| {
            let mut columns = spec.settings(side).include_columns().to_vec();
            columns.sort_unstable();
            columns
        });
        spec.match_schema = match_table_schema(&spec);
        spec.unmatched_schemas = InputTable::BOTH
            .map(|side| unmatched_schema(spec.settings(side), &spec.outer_includes[side.index()]));
        Ok(spec)
    }
}

/// Match table columns when join columns are merged.
///
/// A left column is output if it is included, or if it is a join column one of whose right
/// partners is included. Right join columns with a left column partner are folded into that
/// left column and dropped from the right part.
fn merged_match_includes(
    left: &JoinTableSettings,
    right: &JoinTableSettings,
) -> Result<([Vec<usize>; 2], Vec<Vec<usize>>)> {
    let mut left_includes = Vec::new();
    let mut merged_right_columns = Vec::new();
    for (col, field) in left.schema().fields().iter().enumerate() {
        let name = field.name();
        let partners = join_partners(left, right, name);
        let included_via_merge = partners.iter().any(|partner| right.is_included(partner));
        if !left.is_included(name) && !included_via_merge {
            continue;
        }
        left_includes.push(col);
        merged_right_columns.push(
            partners
                .iter()
                .map(|partner| Ok(right.schema().index_of(partner)?))
                .collect::<Result<Vec<_>>>()?,
        );
    }

    let right_includes: Vec<usize> = right
        .include_columns()
        .iter()
        .zip(right.include_column_names())
        .filter(|(_, name)| join_partners(right, left, name).is_empty())
        .map(|(&col, _)| col)
        .collect();

    Ok(([left_includes, right_includes], merged_right_columns))
}

fn output_field(field: &Field, name: String) -> Field {
    Field::new(name, field.data_type().clone(), true)
}

fn match_table_schema(spec: &JoinSpecification) -> SchemaRef {
    let disambiguator = spec.column_name_disambiguator.as_ref();
    let left = spec.left_settings();
    let right = spec.right_settings();
    let mut taken: FxHashSet<String> = FxHashSet::default();
    let mut fields = Vec::new();

    for &col in spec.match_table_includes(InputTable::Left) {
        let field = left.schema().field(col);
        let name = field.name();
        let output_name = if !spec.merge_join_columns || !left.is_join_column(name) {
            name.clone()
        } else {
            let partners = spec.join_partners(InputTable::Left, name);
            if partners.is_empty() || partners.iter().any(|partner| partner == name) {
                name.clone()
            } else {
                let merged = format!("{name}={}", partners.join("="));
                disambiguate_column_name(&merged, |n| taken.contains(n), disambiguator)
            }
        };
        taken.insert(output_name.clone());
        fields.push(output_field(field, output_name));
    }

    for &col in spec.match_table_includes(InputTable::Right) {
        let field = right.schema().field(col);
        let output_name =
            disambiguate_column_name(field.name(), |n| taken.contains(n), disambiguator);
        taken.insert(output_name.clone());
        fields.push(output_field(field, output_name));
    }

    Arc::new(Schema::new(fields))
}

fn unmatched_schema(settings: &JoinTableSettings, columns: &[usize]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|&col| {
            let field = settings.schema().field(col);
            output_field(field, field.name().clone())
        })
        .collect();
    Arc::new(Schema::new(fields))
}
