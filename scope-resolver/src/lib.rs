//! OAuth scope resolution for registered clients.
//!
//! A [`ScopeResolver`] answers two questions about a [`Client`]: which scopes it may
//! request on its own behalf, and which it may request while impersonating a user.
//! Impersonation rights are checked by an [`AccessEvaluator`], either in process or
//! against an OPA policy.

pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod evaluator;
pub mod keys;
pub mod memo;
pub mod models;
pub mod resolver;
pub mod rules;
pub mod store;
#[cfg(test)]
mod test_utils;

pub use config::Settings;
pub use context::RequestContext;
pub use errors::{ResolveError, SetupError};
pub use evaluator::{AccessEvaluator, EvaluationError};
pub use memo::{Memo, Resolved, Source};
pub use models::{Client, ClientDto, KeyResult, Permission, SignedInUser};
pub use resolver::{ScopeResolver, DEFAULT_SCOPES};
pub use rules::{ScopeRule, ScopeRules};
