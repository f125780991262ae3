//! ChangeSync pipeline stages.
//!
//! This crate provides the two stages that sit on either side of the durable
//! queue:
//!
//! - [`IngestionEndpoint`] turns an [`pipeline::InboundNotification`] into a
//!   [`pipeline::ChangeEvent`] (resolving its changed files through a
//!   [`pipeline::ChangedFilesSource`]) and pushes it onto the queue.
//! - [`ConsolidationWorker`] drains the queue, folds each event into a
//!   [`pipeline::ConsolidatedState`], and flushes consolidated partitions to a
//!   [`pipeline::ConsolidatedChangesSink`].
//!
//! [`MemoryQueue`] is an in-process [`pipeline::EventQueue`] for single-process
//! deployments and tests. [`LoggingSink`] is the default downstream step.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Stages sequence calls between business logic in the
//! [`pipeline`] crate and infrastructure traits (queue, changed-files lookup,
//! sink). They contain no transport details of their own.

pub mod endpoint;
pub mod memory;
pub mod sink;
pub mod worker;

pub use endpoint::{Accepted, IngestionConfig, IngestionEndpoint};
pub use memory::MemoryQueue;
pub use sink::LoggingSink;
pub use worker::{ConsolidationWorker, FlushPolicy, StepOutcome, WorkerConfig};
