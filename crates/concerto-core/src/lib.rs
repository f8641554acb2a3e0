//! # concerto-core
//!
//! Collaborator traits and concurrency primitives for the Concerto runtime.
//!
//! This crate provides:
//! - The collaborator traits (`TaskDispatcher`, `MemoryStore`, `EpisodicMemory`,
//!   `WorkingMemory`, `KnowledgeGraph`, `RateLimiter`)
//! - `WorkerPool`, the bounded thread pool used for handler dispatch and
//!   parallel workflow branches
//! - `PendingResponses`, the correlation table behind every blocking
//!   request/response exchange
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concerto_core::{pool::WorkerPool, rendezvous::PendingResponses, traits::TaskDispatcher};
//! ```

pub mod pool;
pub mod rendezvous;
pub mod traits;

pub use pool::{spawn_task, JoinError, TaskHandle, WorkerPool};
pub use rendezvous::PendingResponses;
