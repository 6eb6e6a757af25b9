//! Outgoing HTTP: request description, retry policy and the executing client.

mod client;
mod request;
mod retry;

pub use client::RequestClient;
pub use request::{Access, ApiRequest, Payload};
pub use retry::RetryPolicy;
