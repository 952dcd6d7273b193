//! Goal Trail
//!
//! Client core for a personal goal tracker with a finance-habit module:
//! - Numeric goals with clamped progress and aggregate stats
//! - A single savings trail split into daily installments
//! - Market panels and AI tips fetched from serverless functions
//! - A streamed finance chat assistant with cancellation
//! - A voice bridge over platform speech capabilities
//!
//! Every store persists through an injected `KeyValueStorage`.

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod goals;
pub mod market;
pub mod models;
pub mod remote;
pub mod savings;
pub mod storage;
pub mod tips;
pub mod validation;
pub mod voice;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use chat::ChatSession;
pub use goals::GoalStore;
pub use savings::SavingsTrailStore;
