//! CRM Sync Core Library
//!
//! This crate provides the domain models, error types and configuration shared by
//! every component of the tenant data sync: the orchestrator, the persistence layer,
//! the wrapper API client and the organization-assignment event consumer.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{BaseConfig, ConsumerConfig, RetrySettings, SyncConfig};
pub use error::{AppError, ErrorMetadata, LogLevel, SyncErrorKind};
