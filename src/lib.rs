//! Two-way bridge between a Supernote private cloud folder and Paperless-ngx.
//!
//! - [`inbound`]: `.note` files are converted to PDF and uploaded.
//! - [`outbound`]: documents tagged on the server are mirrored into the
//!   device's `Document/` folder and removed again when the tag goes away.
//!
//! Both directions record what they did in the [`db`] state store so a restart
//! never uploads or downloads the same thing twice.

pub mod config;
pub mod convert;
pub mod db;
pub mod inbound;
pub mod models;
pub mod outbound;
pub mod paperless;
