//! Query facade: one engine over the compile, plan and execute stages, plus the service
//! interfaces task executors submit queries through.

pub mod bridge;
pub mod engine;
pub mod error;
pub mod local;
pub mod service;

pub use bridge::QueryServiceBridge;
pub use engine::QueryEngine;
pub use error::QueryError;
pub use local::LocalQueryService;
pub use service::{
    AsyncQueryService, Query, QueryCompiler, QueryResult, QueryService, Request, ResultIterator,
    Statistics,
};
