//! Placeholder discovery.
//!
//! Placeholder ordinals come from the token stream, so every `?` in the SQL
//! text is counted regardless of where it appears. The AST walk only decides
//! which placeholders are bound to a column: INSERT values, UPDATE and upsert
//! assignments and equality predicates (`=`, `<>`, `IN (...)`).

use sqlparser::ast::{
    Assignment, AssignmentTarget, BinaryOperator, Expr, OnConflictAction, OnInsert, SetExpr,
    Statement, Value,
};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan};

use crate::error::RewriteError;
use crate::resolver::ColumnRef;

/// Where a bound placeholder sits in the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOrigin {
    /// `VALUES` row `row`, position `column` of the INSERT column list.
    InsertValue { row: usize, column: usize },
    /// The `index`-th assignment of an UPDATE.
    Assignment { index: usize },
    /// The `index`-th assignment of `ON DUPLICATE KEY UPDATE` or
    /// `ON CONFLICT ... DO UPDATE`.
    UpsertAssignment { index: usize },
    /// A filter comparison.
    Predicate,
}

/// A group of values written to the same row: one VALUES row, the SET list
/// of an UPDATE, or the update list of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteTarget {
    Row(usize),
    Set,
    Upsert,
}

impl SlotOrigin {
    /// Whether the placeholder supplies a stored value rather than a filter.
    pub fn is_write(&self) -> bool {
        !matches!(self, SlotOrigin::Predicate)
    }

    pub fn write_target(&self) -> Option<WriteTarget> {
        match self {
            SlotOrigin::InsertValue { row, .. } => Some(WriteTarget::Row(*row)),
            SlotOrigin::Assignment { .. } => Some(WriteTarget::Set),
            SlotOrigin::UpsertAssignment { .. } => Some(WriteTarget::Upsert),
            SlotOrigin::Predicate => None,
        }
    }

    /// Position within the write target: the INSERT column or the assignment.
    pub fn position(&self) -> Option<usize> {
        match self {
            SlotOrigin::InsertValue { column, .. } => Some(*column),
            SlotOrigin::Assignment { index } | SlotOrigin::UpsertAssignment { index } => {
                Some(*index)
            }
            SlotOrigin::Predicate => None,
        }
    }
}

/// Assignments of an INSERT's upsert clause, if it has one.
pub fn upsert_assignments(on: Option<&OnInsert>) -> &[Assignment] {
    match on {
        Some(OnInsert::DuplicateKeyUpdate(assignments)) => assignments,
        Some(OnInsert::OnConflict(conflict)) => match &conflict.action {
            OnConflictAction::DoUpdate(update) => &update.assignments,
            OnConflictAction::DoNothing => &[],
        },
        _ => &[],
    }
}

/// A placeholder bound to a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundSlot {
    /// Index into the statement's parameter mappings.
    pub ordinal: usize,
    pub column: ColumnRef,
    pub origin: SlotOrigin,
}

/// Textual positions of the placeholders of one SQL string.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderIndex {
    locations: Vec<Location>,
    numbered: bool,
}

impl PlaceholderIndex {
    pub fn new(tokens: &[TokenWithSpan]) -> Self {
        let mut index = Self::default();
        for token in tokens {
            if let Token::Placeholder(text) = &token.token {
                index.numbered |= numbered_ordinal(text).is_some();
                index.locations.push(token.span.start);
            }
        }
        index
    }

    /// Number of placeholder occurrences.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Whether the SQL uses numbered placeholders (`$1`) instead of positional ones (`?`).
    pub fn is_numbered(&self) -> bool {
        self.numbered
    }

    /// Check that the placeholders line up with `mappings` parameter mappings.
    pub fn validate(&self, mappings: usize) -> Result<(), RewriteError> {
        let consistent = if self.numbered {
            true
        } else {
            self.locations.len() == mappings
        };
        if consistent {
            Ok(())
        } else {
            Err(RewriteError::PlaceholderMismatch {
                placeholders: self.locations.len(),
                mappings,
            })
        }
    }

    fn ordinal(&self, text: &str, location: Location) -> Result<usize, RewriteError> {
        if let Some(ordinal) = numbered_ordinal(text) {
            return Ok(ordinal);
        }
        self.locations
            .iter()
            .position(|l| *l == location)
            .ok_or_else(|| RewriteError::UnlocatedPlaceholder {
                placeholder: format!("{text} at {location:?}"),
            })
    }
}

/// `$3` -> 2.
fn numbered_ordinal(text: &str) -> Option<usize> {
    text.strip_prefix('$')?.parse::<usize>().ok()?.checked_sub(1)
}

/// Collect every column-bound placeholder of a statement.
pub fn collect_slots(
    stmt: &Statement,
    index: &PlaceholderIndex,
) -> Result<Vec<BoundSlot>, RewriteError> {
    let mut collector = SlotCollector {
        index,
        slots: Vec::new(),
    };
    collector.visit_statement(stmt)?;
    collector.slots.sort_by_key(|slot| slot.ordinal);
    Ok(collector.slots)
}

struct SlotCollector<'a> {
    index: &'a PlaceholderIndex,
    slots: Vec<BoundSlot>,
}

impl SlotCollector<'_> {
    fn push(
        &mut self,
        placeholder: (&str, Location),
        column: ColumnRef,
        origin: SlotOrigin,
    ) -> Result<(), RewriteError> {
        let ordinal = self.index.ordinal(placeholder.0, placeholder.1)?;
        self.slots.push(BoundSlot {
            ordinal,
            column,
            origin,
        });
        Ok(())
    }

    fn visit_statement(&mut self, stmt: &Statement) -> Result<(), RewriteError> {
        match stmt {
            Statement::Insert(insert) => {
                let columns: Vec<ColumnRef> = insert
                    .columns
                    .iter()
                    .map(|c| ColumnRef::parse(&unquote(&c.to_string())))
                    .collect();
                let Some(source) = &insert.source else {
                    return Ok(());
                };
                if let SetExpr::Values(values) = source.body.as_ref() {
                    for (row, exprs) in values.rows.iter().enumerate() {
                        for (column, expr) in exprs.iter().enumerate().take(columns.len()) {
                            if let Some(placeholder) = placeholder(expr) {
                                self.push(
                                    placeholder,
                                    columns[column].clone(),
                                    SlotOrigin::InsertValue { row, column },
                                )?;
                            }
                        }
                    }
                }
                self.visit_assignments(upsert_assignments(insert.on.as_ref()), |index| {
                    SlotOrigin::UpsertAssignment { index }
                })?;
                if let Some(OnInsert::OnConflict(conflict)) = &insert.on {
                    if let OnConflictAction::DoUpdate(update) = &conflict.action {
                        if let Some(selection) = &update.selection {
                            self.visit_predicate(selection)?;
                        }
                    }
                }
            }
            Statement::Update(update) => {
                self.visit_assignments(&update.assignments, |index| SlotOrigin::Assignment {
                    index,
                })?;
                if let Some(selection) = &update.selection {
                    self.visit_predicate(selection)?;
                }
            }
            Statement::Delete(delete) => {
                if let Some(selection) = &delete.selection {
                    self.visit_predicate(selection)?;
                }
            }
            Statement::Query(query) => {
                if let Some(select) = query.body.as_select() {
                    if let Some(selection) = &select.selection {
                        self.visit_predicate(selection)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_assignments(
        &mut self,
        assignments: &[Assignment],
        origin: impl Fn(usize) -> SlotOrigin,
    ) -> Result<(), RewriteError> {
        for (index, assignment) in assignments.iter().enumerate() {
            let AssignmentTarget::ColumnName(name) = &assignment.target else {
                continue;
            };
            if let Some(placeholder) = placeholder(&assignment.value) {
                self.push(
                    placeholder,
                    ColumnRef::parse(&unquote(&name.to_string())),
                    origin(index),
                )?;
            }
        }
        Ok(())
    }

    fn visit_predicate(&mut self, expr: &Expr) -> Result<(), RewriteError> {
        match expr {
            Expr::BinaryOp { left, op, right } => {
                if matches!(op, BinaryOperator::Eq | BinaryOperator::NotEq) {
                    if let (Some(column), Some(p)) = (column_ref(left), placeholder(right)) {
                        return self.push(p, column, SlotOrigin::Predicate);
                    }
                    if let (Some(column), Some(p)) = (column_ref(right), placeholder(left)) {
                        return self.push(p, column, SlotOrigin::Predicate);
                    }
                }
                self.visit_predicate(left)?;
                self.visit_predicate(right)
            }
            Expr::InList { expr, list, .. } => {
                if let Some(column) = column_ref(expr) {
                    for item in list {
                        if let Some(p) = placeholder(item) {
                            self.push(p, column.clone(), SlotOrigin::Predicate)?;
                        }
                    }
                }
                Ok(())
            }
            Expr::Nested(inner) | Expr::UnaryOp { expr: inner, .. } => self.visit_predicate(inner),
            _ => Ok(()),
        }
    }
}

/// The placeholder text and location, if `expr` is a (possibly cast) placeholder.
pub(crate) fn placeholder(expr: &Expr) -> Option<(&str, Location)> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::Placeholder(text) => Some((text.as_str(), value.span.start)),
            _ => None,
        },
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => placeholder(inner),
        _ => None,
    }
}

/// The column named by `expr`, if it is a plain or qualified identifier.
pub(crate) fn column_ref(expr: &Expr) -> Option<ColumnRef> {
    match expr {
        Expr::Identifier(ident) => Some(ColumnRef::new(None, &ident.value)),
        Expr::CompoundIdentifier(idents) => {
            let (column, rest) = idents.split_last()?;
            Some(ColumnRef::new(
                rest.last().map(|q| q.value.as_str()),
                &column.value,
            ))
        }
        Expr::Nested(inner) => column_ref(inner),
        _ => None,
    }
}

fn unquote(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect()
}
