//! Library crate for shared-table-back, exposing modules for binaries and unit tests.

pub mod config;
/// Upstream clients: booking backend and payment provider.
pub mod dao;
mod dto;
mod error;
/// HTTP routes.
pub mod routes;
/// Business operations behind the routes.
pub mod services;
/// Shared and per-session state.
pub mod state;
#[cfg(test)]
mod test_support;
