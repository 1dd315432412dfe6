//! HTTP routes for the agreement backend

pub mod agreements;
pub mod auth_routes;
pub mod health;
pub mod helpers;
pub mod org_units;
pub mod users;

pub use agreements::handle_agreements_request;
pub use health::{health_check, version_info};
pub use helpers::{error_from, error_response, json_response, respond, FullBody};
