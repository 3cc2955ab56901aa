//! Query service interfaces
//!
//! A [`QueryService`] hands back a [`ResultIterator`] that is drained result by result.
//! An [`AsyncQueryService`] hands back a running [`Query`] whose results arrive all at
//! once on [`Query::ready`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tsq_execute::Table;
use tsq_ir::Spec;

use crate::error::QueryError;

/// What to run: an already compiled spec, or a script compiled by the service.
#[derive(Debug, Clone)]
pub enum QueryCompiler {
    Spec(Spec),
    Script(String),
}

#[derive(Debug, Clone)]
pub struct Request {
    pub organization_id: String,
    pub compiler: QueryCompiler,
}

impl Request {
    pub fn spec(organization_id: impl Into<String>, spec: Spec) -> Self {
        Self {
            organization_id: organization_id.into(),
            compiler: QueryCompiler::Spec(spec),
        }
    }

    pub fn script(organization_id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            compiler: QueryCompiler::Script(script.into()),
        }
    }
}

/// Tables of one named result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub name: String,
    pub tables: Vec<Arc<Table>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    pub compile_duration: Duration,
    pub plan_duration: Duration,
    pub execute_duration: Duration,
    pub total_duration: Duration,
    pub concurrency: usize,
}

#[async_trait]
pub trait ResultIterator: Send {
    /// Waits until the next result is available. False once the results are exhausted
    /// or the query failed.
    async fn more(&mut self) -> bool;

    fn next(&mut self) -> Option<QueryResult>;

    /// Failure of the query, checked after `more` returned false.
    fn err(&self) -> Option<QueryError>;

    fn cancel(&mut self);
}

#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<Box<dyn ResultIterator>, QueryError>;
}

/// A submitted query.
#[async_trait]
pub trait Query: Send + Sync {
    /// Results by name, delivered once. `None` when the query failed, see [`Query::err`],
    /// or when the results were already taken.
    async fn ready(&self) -> Option<BTreeMap<String, QueryResult>>;

    fn err(&self) -> Option<QueryError>;

    /// Asks the query to stop. Results may still arrive if it already finished.
    fn cancel(&self);

    /// Releases the query once its execution has wound down. Every submitted query is
    /// done exactly once by its consumer.
    async fn done(&self);

    fn statistics(&self) -> Statistics;
}

#[async_trait]
pub trait AsyncQueryService: Send + Sync {
    async fn query(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<Arc<dyn Query>, QueryError>;

    async fn query_with_compile(
        &self,
        cancel: CancellationToken,
        organization_id: &str,
        script: &str,
    ) -> Result<Arc<dyn Query>, QueryError> {
        self.query(cancel, Request::script(organization_id, script))
            .await
    }
}
