//! convo-cache - conversation view model for a chat client
//!
//! Pages history out of an external store, consolidates consecutive messages
//! into display units, splices corrections into place and exposes the result
//! as a flat list for a rendering layer.

pub mod adapter;
pub mod avatar;
pub mod chat_state;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod geo;
pub mod history;
pub mod message;
pub mod registry;
pub mod session;
pub mod store;
pub mod unit;

pub use error::{Error, Result};
