//! Yahoo Finance v8 chart API.
//!
//! Daily bars only. Yahoo has no official API and changes its payloads
//! without notice, so parsing is lenient: missing arrays and null cells
//! become `None` rather than errors.

pub mod params;
pub mod provider;
pub mod response;

pub use provider::YahooProvider;
