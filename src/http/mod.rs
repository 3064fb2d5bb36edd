//! HTTP surface: router, token verification, errors

pub mod middleware;
pub mod routes;

pub use routes::build_router;
