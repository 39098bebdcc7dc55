//! # Chronix API
//!
//! HTTP submission boundary for the Chronix scheduler.
//!
//! ```text
//! GET  /              - Liveness text
//! GET  /health        - Uptime and registered task types
//! POST /schedule/reminder - Schedule an email reminder
//! POST /schedule      - Schedule any registered task type
//! GET  /tasks/{id}    - Task status
//! ```

pub mod error;
pub mod http;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use http::routes::create_router;
pub use server::{ApiConfig, ApiServer};
pub use state::AppState;
