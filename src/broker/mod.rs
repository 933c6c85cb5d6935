//! Broker Client facade: authentication, validation, paper-mode gating,
//! rate limiting, and error classification live here so every other
//! component talks to one seam instead of the broker SDK directly.

pub mod auth;
pub mod client;
pub mod gateway;

pub use auth::{AuthManager, HttpTokenIssuer, TokenIssuer};
pub use client::BrokerClient;
pub use gateway::{BrokerGateway, HistoricalDataRequest, HttpBrokerGateway, PlaceOrderRequest};
