//! # Pulse Common Library
//!
//! Shared code for the Pulse webhook service and reporting tools:
//! - Webhook signature verification
//! - Event classification and payload normalization
//! - Subject aggregate model and the single-writer aggregate store
//! - Webhook capture log
//! - Configuration loading and root folder resolution
//! - Upstream provider API client
//! - Seeded demo fixtures (test data only)

pub mod aggregate;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod fixtures;
pub mod provider;
pub mod signature;
pub mod store;

pub use aggregate::{AggregateMap, SubjectAggregate, SubjectPatch};
pub use error::{Error, Result};
pub use events::{EventKind, WebhookEvent};
pub use store::{AggregateStore, StoreHandle};
