//! Paperless-ngx REST API client.

mod client;
mod types;

pub use client::*;
pub use types::*;
