//! Test helpers for orchestrator and consumer tests
//!
//! In-memory implementations of the store traits. No database connection is
//! needed, so every test gets its own isolated stores.

pub mod memory_store;

pub use memory_store::{MemorySyncStatusStore, MemoryTenantStore};
