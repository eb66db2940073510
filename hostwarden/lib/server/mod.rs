//! HTTP and WebSocket surface of hostwarden.
//!
//! The REST API under `/api` drives the firewall reconciler, the service controller and user
//! management; `/ws` carries the live status stream. Every route except login expects a bearer
//! token issued by `POST /api/auth/login`.

mod data;
mod extract;
mod handlers;
mod routes;
mod state;
mod ws;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use data::*;
pub use extract::*;
pub use handlers::LOG_VIEW_LIMIT;
pub use routes::*;
pub use state::*;
