//! HTTP surface of the relay.
//!
//! - **[`handlers`]**: Axum route handlers for `/api/*`
//! - **[`models`]**: JSON bodies returned by those handlers
//!
//! The OpenAPI document for these endpoints lives in [`crate::openapi`] and is served at
//! `/api/openapi.json`, with an interactive reference at `/api/docs`.

pub mod handlers;
pub mod models;
