//! TSQ execution engine
//!
//! A plan runs as a push-based dataflow. Sources push immutable [`Table`]s into
//! transformations; each transformation writes into its [`Dataset`], whose builder
//! cache holds one table per group key until a watermark or the end of input triggers
//! it downstream.

mod allocator;
mod builder;
mod dataset;
mod error;
mod executor;
mod registry;
mod source;
mod table;
mod transformation;

pub use allocator::Allocator;
pub use builder::{TableBuilder, TableBuilderCache};
pub use dataset::{AccumulationMode, Dataset, DatasetId, DatasetRef};
pub use error::ExecuteError;
pub use executor::{Executor, ResultSink, Results};
pub use registry::{CreateSource, CreateTransformation, TransformationRegistry};
pub use source::{TableReader, TableSource};
pub use table::{col_idx, ColMeta, ColType, ColumnData, GroupKey, Table};
pub use transformation::{
    Administration, CachedTransformation, Dependencies, Downstream, Source, TableProcessor,
    Transformation, TransformationRef,
};
