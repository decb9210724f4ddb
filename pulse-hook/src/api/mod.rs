//! HTTP API handlers for pulse-hook

pub mod admin;
pub mod buildinfo;
pub mod health;
pub mod subjects;
pub mod webhook;

pub use admin::admin_routes;
pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use subjects::subject_routes;
pub use webhook::webhook_routes;
