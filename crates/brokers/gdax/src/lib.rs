//! GDAX (Coinbase Pro) adapter.
//!
//! REST access goes through [`GdaxClient`], which implements
//! [`blockhead_core::Exchange`]; the full-channel websocket feed is read with
//! [`GdaxFeed`]. Both authenticate with a [`Credential`] built from the
//! `[keys]` section of a [`GdaxConfig`] file.

pub mod config;
pub mod credential;
pub mod http;
pub mod protocol;
pub mod websocket;

pub use config::{ConfigError, GdaxConfig};
pub use credential::Credential;
pub use http::GdaxClient;
pub use websocket::{GdaxFeed, DEFAULT_CHANNELS};
