//! Shared types, errors, and configuration for the wallet-point ledger.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for type-safe entity references
//! - Offset and cursor pagination types for list endpoints
//! - Application-wide error types
//! - Configuration management
//! - Bearer token claims issued by the auth service

pub mod auth;
pub mod config;
pub mod error;
pub mod jwt;
pub mod types;

pub use auth::{Claims, Role};
pub use config::{AppConfig, DatabaseConfig, JwtConfig, LedgerConfig, ServerConfig};
pub use error::{AppError, AppResult};
pub use jwt::{JwtError, JwtService};
