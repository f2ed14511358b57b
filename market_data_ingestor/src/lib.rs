//! External market data collaborators.
//!
//! Three capabilities are exposed as async traits in [`providers`]:
//! historical daily bars ([`providers::DataProvider`]), live last-trade quotes
//! ([`providers::QuoteProvider`]) and published daily benchmark rates
//! ([`providers::RateProvider`]). Concrete HTTP implementations live in
//! [`providers::yahoo`], [`providers::rtd`] and [`providers::bcb`].

pub mod models;
pub mod providers;
