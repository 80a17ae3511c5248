//! Google Cloud REST backend
//!
//! `ComputeClient` and `PubsubClient` implement the cloud traits over the
//! Compute Engine v1 and Pub/Sub v1 JSON APIs using a blocking HTTP client.

mod auth;
mod compute;
mod http;
mod pubsub;

pub use auth::{TokenSource, TOKEN_ENV};
pub use compute::{ComputeClient, COMPUTE_API};
pub use pubsub::{PubsubClient, PUBSUB_API};

use std::sync::Arc;

use super::{CloudClients, CloudResult};

/// Clients for the public Google Cloud endpoints, sharing one token source.
pub fn clients() -> CloudResult<CloudClients> {
    let tokens = Arc::new(TokenSource::from_env());
    Ok(CloudClients::new(
        Arc::new(ComputeClient::new(tokens.clone())?),
        Arc::new(PubsubClient::new(tokens)?),
    ))
}
