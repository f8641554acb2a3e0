//! # concerto-memory
//!
//! In-memory implementations of the runtime's memory collaborators:
//!
//! - `InMemoryStore`           — `MemoryStore` with per-entry TTL
//! - `InMemoryEpisodicMemory`  — `EpisodicMemory`, a bounded experience log
//! - `InMemoryWorkingMemory`   — `WorkingMemory`, priority-evicting
//! - `InMemoryKnowledgeGraph`  — `KnowledgeGraph`, deduplicated triples
//!
//! Nothing is persisted; state lives as long as the value does.

pub mod episodic;
pub mod graph;
pub mod store;
pub mod working;

pub use episodic::InMemoryEpisodicMemory;
pub use graph::{InMemoryKnowledgeGraph, Triple};
pub use store::InMemoryStore;
pub use working::InMemoryWorkingMemory;
