//! Shared types for the Trade Republic timeline protocol
//!
//! This crate provides the core type definitions used across the workspace.
//! It has minimal dependencies and can be used independently.
//!
//! # Key Types
//!
//! - [`OutboundFrame`], [`InboundFrame`], [`Topic`] - Wire framing
//! - [`apply_delta`] - Delta frame decoding
//! - [`RawTransaction`], [`Page`], [`EnrichedTransaction`], [`TransactionSet`] - Timeline data
//! - [`Session`] - Authenticated session tokens
//! - [`TrError`], [`AuthError`], [`ConnectionError`] - Error types
//! - [`TokenBucket`] - Client-side request pacing

pub mod delta;
pub mod error;
pub mod frame;
pub mod rate_limit;
pub mod session;
pub mod transaction;

// Re-export commonly used types
pub use delta::apply_delta;
pub use error::*;
pub use frame::*;
pub use rate_limit::*;
pub use session::Session;
pub use transaction::*;

// Re-export rust_decimal for users
pub use rust_decimal::Decimal;
