//! Provider clients
//!
//! `HttpProvider` speaks a Replicate-style prediction API over reqwest;
//! `MockProvider` is a scriptable in-memory stand-in for tests and
//! offline runs. Both implement `gencore::GenerationProvider`.

mod http;
mod mock;

pub use http::{HttpProvider, HttpProviderConfig};
pub use mock::MockProvider;
