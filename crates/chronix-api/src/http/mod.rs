//! HTTP handlers and routes.

pub mod handlers;
pub mod monitoring;
pub mod routes;
