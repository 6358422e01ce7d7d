//! ejabberd REST API backend.
//!
//! Talks to `mod_http_api`: every command is a `POST {base_uri}{command}` with a JSON
//! body. Requires `mod_admin_extra` for most account commands.

mod backend;
mod client;
mod types;

pub use backend::EjabberdRestBackend;
pub use client::{RestConfig, DEFAULT_URI};
