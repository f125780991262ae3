//! ChangeSync event source infrastructure.
//!
//! Provides the two infrastructure pieces around the queue:
//!
//! - [`webhook_router`]: an axum router that receives GitHub webhook
//!   deliveries, normalizes them into [`pipeline::InboundNotification`]s, and
//!   hands them to a [`stages::IngestionEndpoint`]. Deliberately ignored
//!   notifications and application-level rejections still answer `200` so the
//!   sender never retry-storms.
//!
//! - [`RedisQueue`]: a [`pipeline::EventQueue`] backed by a Redis list
//!   (`RPUSH` to enqueue, `BLPOP` to dequeue) via `fred`.
//!
//! ## Deployment Scenarios
//!
//! | Scenario | Queue | Notes |
//! |----------|-------|-------|
//! | Single process (dev) | `stages::MemoryQueue` | Receiver and worker share the queue; not durable |
//! | Split receiver / worker | `RedisQueue` | One worker process per list key |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport details, broker configuration, and webhook
//! payload parsing all live here. The [`pipeline`] crate sees only
//! [`pipeline::EventQueue`] and [`pipeline::InboundNotification`].
//!
//! Signature verification of inbound deliveries is not performed here; deploy
//! the receiver behind something that does.

mod redis;
mod webhook;

pub use redis::{RedisQueue, RedisQueueConfig};
pub use webhook::{serve, webhook_router, WebhookState};
