//! Convenios - institutional agreement tracking backend
//!
//! Directors of an org unit ("establecimiento") create agreements made of
//! weighted dimensions, each holding indicators with tasks. Management users
//! assigned to a dimension fill in indicators, tasks and evidence, and
//! reviewers follow and finalize agreements.
//!
//! ## Layers
//!
//! - **Routes**: JSON HTTP endpoints, bearer token extraction
//! - **Services**: the agreement aggregate, users, org units, workbook import/export
//! - **Auth**: JWT, password hashing and the permission policy
//! - **Store**: MongoDB-backed or in-memory persistence

pub mod auth;
pub mod config;
pub mod db;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ConvenioError, Result};
