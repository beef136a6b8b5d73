//! Remote API seam
//!
//! The sync core only ever talks to the backend through [`RemoteApi`]. The
//! default implementation is [`HttpApiClient`] (feature `client`); tests
//! substitute scripted fakes.

mod endpoint;
#[cfg(feature = "client")]
mod http;

pub use endpoint::{Endpoint, EndpointDescriptor, HttpMethod};
#[cfg(feature = "client")]
pub use http::{HttpApiClient, HttpApiConfig};

use crate::error::Result;
use crate::traits::RemoteModel;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Request/response access to the backend.
///
/// Implementations report failures with the [`SyncError`](crate::SyncError)
/// taxonomy: `NotConnected` before any attempt while offline,
/// `CredentialMissing`, `RequestMalformed`, `Server`, `Decode`, `NotFound`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Perform one request and return the decoded JSON body.
    ///
    /// An empty body is returned as `Value::Null`.
    async fn request(&self, endpoint: &Endpoint) -> Result<serde_json::Value>;
}

/// Perform a request and decode the body into `T`
pub async fn request_as<T: DeserializeOwned>(api: &dyn RemoteApi, endpoint: &Endpoint) -> Result<T> {
    let value = api.request(endpoint).await?;
    Ok(serde_json::from_value(value)?)
}

/// Fetch and decode the full remote listing of a model
pub async fn fetch_listing<T: RemoteModel>(api: &dyn RemoteApi) -> Result<Vec<T>> {
    let value = api.request(&T::list_endpoint()).await?;
    T::decode_listing(value)
}
