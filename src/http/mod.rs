//! HTTP surface: channel listing, live TS fanout, HLS playlist and
//! segment retrieval, and on-demand EPG lookups.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
