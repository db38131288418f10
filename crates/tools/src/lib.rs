//! Capability server client for typewire.
//!
//! Capability servers expose tools over two endpoints:
//! `GET {url}/tools` lists them and `POST {url}/call` invokes one. Both go
//! through the payment-aware client, so either may demand payment.

pub mod http_client;

pub use http_client::HttpCapabilityClient;
