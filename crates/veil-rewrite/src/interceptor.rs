//! The execution coordinator.
//!
//! An [`Interceptor`] wraps statement execution in two hooks:
//!
//! 1. [`Interceptor::before_execution`] analyzes the statement, rewrites a
//!    copy of it and returns an [`ExecutionContext`] holding the decrypt plan.
//! 2. [`Interceptor::after_execution`] consumes that context and decrypts the
//!    returned rows.
//!
//! The context is an owned value passed from the first hook to the second,
//! so concurrent executions never share per-execution state. Both hooks are
//! fail-open: any error, or a panic raised by the injected cipher, is logged
//! and the statement or rows are used as-is.

use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use veil_core::{FieldCipher, PolicyStore, SqlDialect};

use crate::analyzer::SqlAnalyzer;
use crate::diagnostics::render_sql;
use crate::error::RewriteError;
use crate::plan::DecryptPlan;
use crate::processor::{CommandProcessor, ProcessContext, Processed};
use crate::resolver::ResolvedMapping;
use crate::result::ResultRewriter;
use crate::statement::{BoundStatement, SqlCommand};

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

/// Where an execution is in the interception lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    Analyzing,
    Rewriting,
    /// The statement has been handed to the engine.
    AwaitingExecution,
    Decrypting,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionPhase::Idle => "idle",
            ExecutionPhase::Analyzing => "analyzing",
            ExecutionPhase::Rewriting => "rewriting",
            ExecutionPhase::AwaitingExecution => "awaiting_execution",
            ExecutionPhase::Decrypting => "decrypting",
        };
        f.write_str(name)
    }
}

/// Per-execution state carried from `before_execution` to `after_execution`.
///
/// Dropping a context without passing it to
/// [`Interceptor::after_execution`] (a failed or cancelled execution)
/// releases its decrypt plan.
#[derive(Debug)]
pub struct ExecutionContext {
    id: u64,
    statement_id: String,
    phase: ExecutionPhase,
    plan: Option<DecryptPlan>,
}

impl ExecutionContext {
    fn new(statement_id: &str) -> Self {
        Self {
            id: NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed),
            statement_id: statement_id.to_string(),
            phase: ExecutionPhase::Idle,
            plan: None,
        }
    }

    /// Process-unique execution id, used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn statement_id(&self) -> &str {
        &self.statement_id
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// The decrypt plan for this execution, if the statement needs one.
    pub fn plan(&self) -> Option<&DecryptPlan> {
        self.plan.as_ref()
    }

    fn transition(&mut self, next: ExecutionPhase) {
        tracing::trace!(
            execution_id = self.id,
            statement_id = %self.statement_id,
            from = %self.phase,
            to = %next,
            "Execution phase change"
        );
        self.phase = next;
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.plan.take().is_some() {
            tracing::debug!(
                execution_id = self.id,
                statement_id = %self.statement_id,
                phase = %self.phase,
                "Execution ended before results were processed, decrypt plan released"
            );
        }
    }
}

/// Output of [`Interceptor::before_execution`].
#[derive(Debug)]
pub struct Prepared {
    /// The statement to hand to the engine.
    pub statement: BoundStatement,
    /// Pass to [`Interceptor::after_execution`] with the engine's rows.
    pub context: ExecutionContext,
}

/// Transparent field-level encryption around statement execution.
///
/// Cheap to clone; clones share the policy and cipher.
#[derive(Clone)]
pub struct Interceptor {
    policy: Arc<PolicyStore>,
    cipher: Arc<dyn FieldCipher>,
    analyzer: SqlAnalyzer,
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("policy", &self.policy)
            .field("cipher", &self.cipher.scheme_name())
            .field("analyzer", &self.analyzer)
            .finish()
    }
}

impl Interceptor {
    pub fn builder() -> InterceptorBuilder {
        InterceptorBuilder::default()
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    pub fn analyzer(&self) -> &SqlAnalyzer {
        &self.analyzer
    }

    /// Prepare a statement for execution.
    ///
    /// Returns a rewritten copy when the statement touches encrypted
    /// columns, otherwise an unchanged copy. Never fails.
    pub fn before_execution(&self, statement: &BoundStatement) -> Prepared {
        let mut context = ExecutionContext::new(&statement.id);

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.prepare(statement, &mut context)));
        let prepared = match outcome {
            Ok(Ok(Some(processed))) => {
                context.plan = processed.decrypt_plan.filter(|plan| !plan.is_empty());
                processed.statement
            }
            Ok(Ok(None)) => statement.clone(),
            Ok(Err(e)) => {
                tracing::warn!(
                    execution_id = context.id,
                    statement_id = %statement.id,
                    error = %e,
                    "Statement rewrite failed, executing unmodified statement"
                );
                statement.clone()
            }
            Err(payload) => {
                tracing::error!(
                    execution_id = context.id,
                    statement_id = %statement.id,
                    panic = panic_message(&*payload),
                    "Statement rewrite panicked, executing unmodified statement"
                );
                statement.clone()
            }
        };

        if self.policy.print_sql() {
            tracing::info!(
                execution_id = context.id,
                statement_id = %statement.id,
                sql = %render_sql(&prepared),
                "Prepared statement"
            );
        }

        context.transition(ExecutionPhase::AwaitingExecution);
        Prepared {
            statement: prepared,
            context,
        }
    }

    fn prepare(
        &self,
        statement: &BoundStatement,
        context: &mut ExecutionContext,
    ) -> Result<Option<Processed>, RewriteError> {
        if !self.policy.is_active() {
            return Ok(None);
        }

        context.transition(ExecutionPhase::Analyzing);
        let command = match statement.command {
            SqlCommand::Unknown => self.analyzer.classify(&statement.sql),
            command => command,
        };
        let processor = CommandProcessor::for_command(command);
        if !processor.is_supported() {
            tracing::trace!(statement_id = %statement.id, "No processor for statement");
            return Ok(None);
        }

        let tables = self.analyzer.analyze(&statement.sql);
        let mapping = ResolvedMapping::resolve(&tables, &self.policy);
        if !mapping.needs_processing() {
            tracing::trace!(
                statement_id = %statement.id,
                tables = ?tables.tables,
                "No encrypted columns referenced"
            );
            return Ok(None);
        }

        context.transition(ExecutionPhase::Rewriting);
        let ctx = ProcessContext {
            analyzer: &self.analyzer,
            cipher: self.cipher.as_ref(),
            flags: self.policy.flags(),
        };
        let mut processed = processor.process(ctx, statement, Arc::new(mapping))?;
        processed.statement.command = command;

        tracing::debug!(
            execution_id = context.id,
            statement_id = %statement.id,
            command = %command,
            rewritten = processed.rewritten,
            decrypt = processed.decrypt_plan.is_some(),
            "Statement rewritten"
        );
        Ok(Some(processed))
    }

    /// Decrypt the rows returned for a prepared statement.
    ///
    /// Consumes the context; rows pass through untouched when it holds no
    /// plan or when decryption panics.
    pub fn after_execution(&self, mut context: ExecutionContext, rows: Vec<Value>) -> Vec<Value> {
        let Some(plan) = context.plan.take() else {
            context.transition(ExecutionPhase::Idle);
            return rows;
        };

        context.transition(ExecutionPhase::Decrypting);
        let rewriter = ResultRewriter::new(
            self.cipher.as_ref(),
            self.policy.naming(),
            self.policy.flags(),
        );
        let mut decrypted = rows.clone();
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| rewriter.rewrite(&mut decrypted, &plan)));
        context.transition(ExecutionPhase::Idle);

        match outcome {
            Ok(stats) => {
                tracing::debug!(
                    execution_id = context.id,
                    statement_id = %context.statement_id,
                    rows = stats.rows,
                    decrypted = stats.decrypted,
                    failed = stats.failed,
                    "Results decrypted"
                );
                decrypted
            }
            Err(payload) => {
                tracing::error!(
                    execution_id = context.id,
                    statement_id = %context.statement_id,
                    panic = panic_message(&*payload),
                    "Result decryption panicked, returning rows unmodified"
                );
                rows
            }
        }
    }

    /// Run `engine` between the two hooks.
    ///
    /// Engine errors are returned unchanged; the decrypt plan is released.
    pub fn execute<F, E>(&self, statement: &BoundStatement, engine: F) -> Result<Vec<Value>, E>
    where
        F: FnOnce(&BoundStatement) -> Result<Vec<Value>, E>,
    {
        let Prepared { statement, context } = self.before_execution(statement);
        let rows = engine(&statement)?;
        Ok(self.after_execution(context, rows))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Builder for [`Interceptor`].
#[derive(Default)]
pub struct InterceptorBuilder {
    policy: Option<Arc<PolicyStore>>,
    cipher: Option<Arc<dyn FieldCipher>>,
    dialect: Option<SqlDialect>,
}

impl InterceptorBuilder {
    /// The policy to enforce. Defaults to an empty (pass-through) policy.
    pub fn policy(mut self, policy: impl Into<Arc<PolicyStore>>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn cipher(mut self, cipher: impl FieldCipher + 'static) -> Self {
        let cipher: Arc<dyn FieldCipher> = Arc::new(cipher);
        self.cipher = Some(cipher);
        self
    }

    pub fn shared_cipher(mut self, cipher: Arc<dyn FieldCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Override the dialect from the policy configuration.
    pub fn dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn build(self) -> Result<Interceptor, RewriteError> {
        let cipher = self.cipher.ok_or(RewriteError::MissingCipher)?;
        let policy = self.policy.unwrap_or_else(|| Arc::new(PolicyStore::empty()));
        let dialect = self.dialect.unwrap_or_else(|| policy.dialect());

        tracing::debug!(
            tables = policy.tables().count(),
            enabled = policy.flags().enabled,
            dialect = ?dialect,
            scheme = cipher.scheme_name(),
            "Interceptor ready"
        );

        Ok(Interceptor {
            policy,
            cipher,
            analyzer: SqlAnalyzer::new(dialect),
        })
    }
}
