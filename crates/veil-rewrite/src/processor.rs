//! Per-command statement processors.
//!
//! | Command  | Parameters rewritten                         | Decrypt plan |
//! |----------|----------------------------------------------|--------------|
//! | `INSERT` | values, upsert assignments, shadow columns   | no           |
//! | `UPDATE` | assigned values, shadow columns, predicates  | no           |
//! | `SELECT` | predicates                                   | yes          |
//! | `DELETE` | predicates                                   | no           |
//!
//! Processors work on a clone of the [`BoundStatement`]; the caller's
//! statement is never modified.

use anyhow::anyhow;
use serde_json::Value;
use sqlparser::ast::{
    Assignment, Expr, Ident, OnConflictAction, OnInsert, SelectItem,
    SelectItemQualifiedWildcardKind, SetExpr, Statement,
};
use std::collections::HashMap;
use std::sync::Arc;
use veil_core::{normalize_identifier, CipherError, EncryptionRule, FieldCipher, PolicyFlags};

use crate::analyzer::SqlAnalyzer;
use crate::bindings::{collect_slots, column_ref, BoundSlot, PlaceholderIndex, WriteTarget};
use crate::error::RewriteError;
use crate::plan::DecryptPlan;
use crate::resolver::{ColumnRef, ResolvedMapping};
use crate::statement::{BoundStatement, ParameterMapping, SqlCommand};

/// One processor per SQL command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandProcessor {
    Insert,
    Update,
    Select,
    Delete,
    /// No processor applies; the statement passes through.
    Unsupported,
}

/// What a processor needs besides the statement itself.
#[derive(Clone, Copy)]
pub struct ProcessContext<'a> {
    pub analyzer: &'a SqlAnalyzer,
    pub cipher: &'a dyn FieldCipher,
    pub flags: PolicyFlags,
}

/// Result of processing one statement.
#[derive(Debug, Clone)]
pub struct Processed {
    /// The statement to execute (a rewritten copy).
    pub statement: BoundStatement,
    /// Properties to decrypt after execution, for SELECT.
    pub decrypt_plan: Option<DecryptPlan>,
    /// Number of parameter values replaced or added.
    pub rewritten: usize,
}

impl CommandProcessor {
    pub fn for_command(command: SqlCommand) -> Self {
        match command {
            SqlCommand::Insert => CommandProcessor::Insert,
            SqlCommand::Update => CommandProcessor::Update,
            SqlCommand::Select => CommandProcessor::Select,
            SqlCommand::Delete => CommandProcessor::Delete,
            SqlCommand::Unknown => CommandProcessor::Unsupported,
        }
    }

    pub fn command(&self) -> SqlCommand {
        match self {
            CommandProcessor::Insert => SqlCommand::Insert,
            CommandProcessor::Update => SqlCommand::Update,
            CommandProcessor::Select => SqlCommand::Select,
            CommandProcessor::Delete => SqlCommand::Delete,
            CommandProcessor::Unsupported => SqlCommand::Unknown,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, CommandProcessor::Unsupported)
    }

    /// Rewrite a copy of `statement` according to `mapping`.
    pub fn process(
        &self,
        ctx: ProcessContext<'_>,
        statement: &BoundStatement,
        mapping: Arc<ResolvedMapping>,
    ) -> Result<Processed, RewriteError> {
        if !self.is_supported() {
            return Ok(Processed {
                statement: statement.clone(),
                decrypt_plan: None,
                rewritten: 0,
            });
        }

        let parsed = ctx.analyzer.parse_single(&statement.sql)?;
        let found = ctx.analyzer.get_operation(&parsed);
        if found != self.command() {
            return Err(RewriteError::CommandMismatch {
                expected: self.command().to_string(),
                found: found.to_string(),
            });
        }

        let index = PlaceholderIndex::new(&ctx.analyzer.tokenize(&statement.sql)?);
        index.validate(statement.parameter_mappings.len())?;
        let slots = collect_slots(&parsed, &index)?;

        let mut rewriter = ParameterRewriter {
            ctx,
            original: statement,
            copy: statement.clone(),
            rewritten: 0,
        };

        let decrypt_plan = match self {
            CommandProcessor::Insert => {
                // `ON CONFLICT ... WHERE` filters come before any appended shadow values
                rewriter.rewrite_predicates(&slots, &mapping);
                rewriter.rewrite_writes(&parsed, &slots, &mapping, &index);
                None
            }
            CommandProcessor::Update => {
                // predicates first: adding shadow assignments shifts later ordinals
                rewriter.rewrite_predicates(&slots, &mapping);
                rewriter.rewrite_writes(&parsed, &slots, &mapping, &index);
                None
            }
            CommandProcessor::Select => {
                rewriter.rewrite_predicates(&slots, &mapping);
                let mut plan = build_decrypt_plan(&parsed, Arc::clone(&mapping));
                if ctx.flags.overwrite_plain_by_index {
                    rewriter.project_shadow_columns(&parsed, &mapping, &mut plan);
                }
                Some(plan)
            }
            CommandProcessor::Delete => {
                rewriter.rewrite_predicates(&slots, &mapping);
                None
            }
            CommandProcessor::Unsupported => None,
        };

        Ok(Processed {
            statement: rewriter.copy,
            decrypt_plan,
            rewritten: rewriter.rewritten,
        })
    }
}

/// The cipher operation applied to a plaintext value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    Encrypt,
    Index,
}

impl Transform {
    /// Transform for values sent to the source column and for predicates.
    fn for_source(flags: PolicyFlags) -> Self {
        if flags.overwrite_plain_by_index {
            Transform::Index
        } else {
            Transform::Encrypt
        }
    }

    /// Transform for the shadow column, if the rule writes one.
    fn for_shadow(rule: &EncryptionRule, flags: PolicyFlags) -> Option<Self> {
        if !rule.has_shadow() {
            None
        } else if flags.overwrite_plain_by_index {
            Some(Transform::Encrypt)
        } else if flags.write_index_to_plain && rule.indexed {
            Some(Transform::Index)
        } else {
            None
        }
    }

    fn apply(self, cipher: &dyn FieldCipher, plaintext: &str) -> Result<String, CipherError> {
        match self {
            Transform::Encrypt => cipher.encrypt(plaintext),
            Transform::Index => cipher.index(plaintext),
        }
    }
}

/// A shadow-column value waiting to be bound.
#[derive(Debug, Clone)]
struct ShadowWrite {
    write_target: WriteTarget,
    target: String,
    value: Value,
}

/// Shadow columns appended to one clause, after its `original_len` entries.
struct AppendedColumns {
    targets: Vec<String>,
    original_len: usize,
}

impl AppendedColumns {
    fn new(pending: &[ShadowWrite], include: impl Fn(WriteTarget) -> bool) -> Self {
        let mut targets: Vec<String> = Vec::new();
        for shadow in pending.iter().filter(|s| include(s.write_target)) {
            if !targets.contains(&shadow.target) {
                targets.push(shadow.target.clone());
            }
        }
        Self {
            targets,
            original_len: 0,
        }
    }

    fn appended_at(&self, position: usize) -> Option<&str> {
        position
            .checked_sub(self.original_len)
            .and_then(|i| self.targets.get(i))
            .map(String::as_str)
    }
}

struct ParameterRewriter<'a> {
    ctx: ProcessContext<'a>,
    original: &'a BoundStatement,
    copy: BoundStatement,
    rewritten: usize,
}

impl ParameterRewriter<'_> {
    /// Plaintext of the parameter at `ordinal`; `None` for nulls and structured values.
    fn plain_value(&self, ordinal: usize) -> Option<String> {
        match self.original.parameter_value(ordinal)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn transform(&self, transform: Transform, plaintext: &str, column: &str) -> Option<Value> {
        match transform.apply(self.ctx.cipher, plaintext) {
            Ok(value) => Some(Value::String(value)),
            Err(e) => {
                tracing::warn!(
                    statement_id = %self.original.id,
                    column = %column,
                    scheme = self.ctx.cipher.scheme_name(),
                    error = %e,
                    "Cipher failed, parameter left unmodified"
                );
                None
            }
        }
    }

    fn bind(&mut self, ordinal: usize, value: Value) {
        self.copy.bind(ordinal, value);
        self.rewritten += 1;
    }

    fn rewrite_predicates(&mut self, slots: &[BoundSlot], mapping: &ResolvedMapping) {
        let transform = Transform::for_source(self.ctx.flags);
        for slot in slots.iter().filter(|s| !s.origin.is_write()) {
            let Some(rule) = mapping.rule_for(&slot.column) else {
                continue;
            };
            let Some(plain) = self.plain_value(slot.ordinal) else {
                continue;
            };
            if let Some(value) = self.transform(transform, &plain, &rule.source_column) {
                self.bind(slot.ordinal, value);
            }
        }
    }

    fn rewrite_writes(
        &mut self,
        parsed: &Statement,
        slots: &[BoundSlot],
        mapping: &ResolvedMapping,
        index: &PlaceholderIndex,
    ) {
        let flags = self.ctx.flags;
        let mut shadows = Vec::new();

        for slot in slots.iter().filter(|s| s.origin.is_write()) {
            let Some(rule) = mapping.rule_for(&slot.column) else {
                continue;
            };
            let Some(plain) = self.plain_value(slot.ordinal) else {
                continue;
            };
            if let Some(value) =
                self.transform(Transform::for_source(flags), &plain, &rule.source_column)
            {
                self.bind(slot.ordinal, value);
            }
            let Some(write_target) = slot.origin.write_target() else {
                continue;
            };
            if let Some(transform) = Transform::for_shadow(rule, flags) {
                if let Some(value) = self.transform(transform, &plain, &rule.target_column) {
                    shadows.push(ShadowWrite {
                        write_target,
                        target: rule.target_column.clone(),
                        value,
                    });
                }
            }
        }

        let mut pending = Vec::new();
        for shadow in shadows {
            let target = normalize_identifier(&shadow.target);
            let existing = slots.iter().find(|s| {
                s.origin.write_target() == Some(shadow.write_target)
                    && normalize_identifier(&s.column.column) == target
            });
            match existing {
                Some(slot) => {
                    let ordinal = slot.ordinal;
                    self.bind(ordinal, shadow.value);
                }
                None => pending.push(shadow),
            }
        }

        if pending.is_empty() {
            return;
        }
        if index.is_numbered() {
            tracing::warn!(
                statement_id = %self.original.id,
                "Cannot add shadow columns to a statement with numbered placeholders"
            );
            return;
        }
        if let Err(e) = self.append_shadow_columns(parsed, &pending) {
            tracing::warn!(
                statement_id = %self.original.id,
                error = %e,
                "Failed to add shadow columns, writing encrypted source columns only"
            );
        }
    }

    /// Add the shadow columns the statement does not mention: a column plus
    /// one placeholder per row for INSERT, an assignment for UPDATE and for
    /// an upsert clause.
    fn append_shadow_columns(
        &mut self,
        parsed: &Statement,
        pending: &[ShadowWrite],
    ) -> Result<(), RewriteError> {
        let analyzer = self.ctx.analyzer;
        let mut values = AppendedColumns::new(pending, |t| matches!(t, WriteTarget::Row(_)));
        let mut set = AppendedColumns::new(pending, |t| t == WriteTarget::Set);
        let mut upsert = AppendedColumns::new(pending, |t| t == WriteTarget::Upsert);

        let mut stmt = parsed.clone();
        match &mut stmt {
            Statement::Insert(insert) => {
                values.original_len = insert.columns.len();
                if !values.targets.is_empty() {
                    let Some(SetExpr::Values(rows)) =
                        insert.source.as_mut().map(|query| query.body.as_mut())
                    else {
                        return Err(anyhow!("INSERT without VALUES").into());
                    };
                    for target in &values.targets {
                        let snippet = format!("INSERT INTO t ({target}) VALUES (?)");
                        let Statement::Insert(mut template) = analyzer.parse_single(&snippet)?
                        else {
                            return Err(anyhow!("unexpected template for {target}").into());
                        };
                        let column = template
                            .columns
                            .pop()
                            .ok_or_else(|| anyhow!("template has no column"))?;
                        let placeholder = match template.source.as_mut().map(|q| q.body.as_mut())
                        {
                            Some(SetExpr::Values(template_values)) => {
                                template_values.rows.pop().and_then(|mut row| row.pop())
                            }
                            _ => None,
                        }
                        .ok_or_else(|| anyhow!("template has no placeholder"))?;

                        insert.columns.push(column);
                        for row in rows.rows.iter_mut() {
                            row.push(placeholder.clone());
                        }
                    }
                }
                if !upsert.targets.is_empty() {
                    let assignments = upsert_assignments_mut(insert.on.as_mut())
                        .ok_or_else(|| anyhow!("INSERT without an upsert clause"))?;
                    upsert.original_len = assignments.len();
                    for target in &upsert.targets {
                        assignments.push(assignment_template(analyzer, target)?);
                    }
                }
            }
            Statement::Update(update) => {
                set.original_len = update.assignments.len();
                for target in &set.targets {
                    update.assignments.push(assignment_template(analyzer, target)?);
                }
            }
            _ => return Ok(()),
        }

        let sql = stmt.to_string();
        let index = PlaceholderIndex::new(&analyzer.tokenize(&sql)?);
        let slots = collect_slots(&analyzer.parse_single(&sql)?, &index)?;

        let mut appended: HashMap<usize, (WriteTarget, &str)> = HashMap::new();
        for slot in &slots {
            let (Some(write_target), Some(position)) =
                (slot.origin.write_target(), slot.origin.position())
            else {
                continue;
            };
            let clause = match write_target {
                WriteTarget::Row(_) => &values,
                WriteTarget::Set => &set,
                WriteTarget::Upsert => &upsert,
            };
            if let Some(target) = clause.appended_at(position) {
                appended.insert(slot.ordinal, (write_target, target));
            }
        }

        let mut originals = self.copy.parameter_mappings.iter().cloned();
        let mut mappings = Vec::with_capacity(index.len());
        for ordinal in 0..index.len() {
            match appended.get(&ordinal) {
                Some((write_target, target)) => {
                    let value = pending
                        .iter()
                        .find(|s| s.write_target == *write_target && s.target == *target)
                        .map(|s| s.value.clone())
                        .unwrap_or(Value::Null);
                    mappings.push(ParameterMapping::bound(*target, value));
                }
                None => mappings.push(
                    originals
                        .next()
                        .ok_or_else(|| anyhow!("rewritten statement has extra placeholders"))?,
                ),
            }
        }
        if originals.next().is_some() {
            return Err(anyhow!("rewritten statement lost placeholders").into());
        }

        tracing::debug!(
            statement_id = %self.original.id,
            values = ?values.targets,
            assignments = ?set.targets,
            upsert = ?upsert.targets,
            "Added shadow columns to statement"
        );
        self.rewritten += appended.len();
        self.copy.sql = sql;
        self.copy.parameter_mappings = mappings;
        Ok(())
    }

    /// Under `overwrite_plain_by_index` the source column holds index values
    /// and the ciphertext lives in the shadow column. Project the shadow
    /// column when the SELECT names only the source, and have it removed
    /// from the rows after decryption.
    fn project_shadow_columns(
        &mut self,
        parsed: &Statement,
        mapping: &ResolvedMapping,
        plan: &mut DecryptPlan,
    ) {
        let Statement::Query(query) = parsed else {
            return;
        };
        let Some(select) = query.body.as_select() else {
            return;
        };

        let mut projected = Vec::new();
        let mut wildcard_tables = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => return,
                SelectItem::QualifiedWildcard(kind, _) => {
                    if let Some(table) = wildcard_table(kind, mapping) {
                        wildcard_tables.push(table);
                    }
                }
                SelectItem::UnnamedExpr(expr) => {
                    if let Some(column) = column_ref(expr) {
                        projected.push(normalize_identifier(&column.column));
                    }
                }
                SelectItem::ExprWithAlias { alias, .. } => {
                    projected.push(normalize_identifier(&alias.value));
                }
            }
        }

        let mut missing: Vec<ColumnRef> = Vec::new();
        for item in &select.projection {
            let (SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. }) = item
            else {
                continue;
            };
            let Some(column) = column_ref(expr) else {
                continue;
            };
            let Some(rule) = mapping.rule_for(&column) else {
                continue;
            };
            if !rule.has_shadow() {
                continue;
            }
            let covered = match &column.qualifier {
                Some(qualifier) => mapping
                    .table_for(qualifier)
                    .is_some_and(|table| wildcard_tables.contains(&table)),
                None => !wildcard_tables.is_empty(),
            };
            let target = normalize_identifier(&rule.target_column);
            if covered
                || projected.contains(&target)
                || missing.iter().any(|m| normalize_identifier(&m.column) == target)
            {
                continue;
            }
            missing.push(ColumnRef::new(
                column.qualifier.as_deref(),
                &rule.target_column,
            ));
        }
        if missing.is_empty() {
            return;
        }

        let mut stmt = parsed.clone();
        let Statement::Query(query) = &mut stmt else {
            return;
        };
        let SetExpr::Select(select) = query.body.as_mut() else {
            return;
        };
        for column in &missing {
            let expr = match &column.qualifier {
                Some(qualifier) => Expr::CompoundIdentifier(vec![
                    Ident::new(qualifier.as_str()),
                    Ident::new(column.column.as_str()),
                ]),
                None => Expr::Identifier(Ident::new(column.column.as_str())),
            };
            select.projection.push(SelectItem::UnnamedExpr(expr));
            plan.add_hidden_column(column.column.clone());
        }

        tracing::debug!(
            statement_id = %self.original.id,
            shadow_columns = ?plan.hidden_columns(),
            "Projected shadow columns for decryption"
        );
        self.copy.sql = stmt.to_string();
    }
}

/// `UPDATE t SET target = ?`, parsed and reduced to its assignment.
fn assignment_template(analyzer: &SqlAnalyzer, target: &str) -> Result<Assignment, RewriteError> {
    let snippet = format!("UPDATE t SET {target} = ?");
    let Statement::Update(mut template) = analyzer.parse_single(&snippet)? else {
        return Err(anyhow!("unexpected template for {target}").into());
    };
    template
        .assignments
        .pop()
        .ok_or_else(|| anyhow!("template has no assignment").into())
}

fn upsert_assignments_mut(on: Option<&mut OnInsert>) -> Option<&mut Vec<Assignment>> {
    match on? {
        OnInsert::DuplicateKeyUpdate(assignments) => Some(assignments),
        OnInsert::OnConflict(conflict) => match &mut conflict.action {
            OnConflictAction::DoUpdate(update) => Some(&mut update.assignments),
            OnConflictAction::DoNothing => None,
        },
        _ => None,
    }
}

/// The matched table a `t.*` projection names, if any.
fn wildcard_table<'m>(
    kind: &SelectItemQualifiedWildcardKind,
    mapping: &'m ResolvedMapping,
) -> Option<&'m str> {
    let SelectItemQualifiedWildcardKind::ObjectName(name) = kind else {
        return None;
    };
    let qualifier = name.0.last()?.as_ident()?;
    mapping.table_for(&qualifier.value)
}

/// Record which projected properties of a SELECT hold encrypted values.
fn build_decrypt_plan(parsed: &Statement, mapping: Arc<ResolvedMapping>) -> DecryptPlan {
    let mut plan = DecryptPlan::new(Arc::clone(&mapping));
    let Statement::Query(query) = parsed else {
        return plan;
    };
    let Some(select) = query.body.as_select() else {
        return plan;
    };

    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => plan.add_wildcard(),
            SelectItem::QualifiedWildcard(kind, _) => {
                // `t.*` of an unconfigured table decrypts nothing
                if let Some(table) = wildcard_table(kind, &mapping) {
                    plan.add_table_wildcard(table);
                }
            }
            SelectItem::UnnamedExpr(expr) => {
                if let Some(column) = column_ref(expr) {
                    if let Some(rule) = mapping.rule_for(&column) {
                        plan.insert(column.column.clone(), rule.clone());
                    }
                }
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                if let Some(column) = column_ref(expr) {
                    if let Some(rule) = mapping.rule_for(&column) {
                        plan.insert(alias.value.clone(), rule.clone());
                    }
                }
            }
        }
    }

    plan
}
