//! Persisted model traits

use crate::api::Endpoint;
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Trait for record types that live in the local store.
///
/// Records are stored per `model_name()` and keyed by `model_id()`.
///
/// # Example
///
/// ```rust,ignore
/// impl Model for Location {
///     fn model_name() -> &'static str { "Location" }
///     fn model_id(&self) -> &str { &self.id }
///     fn natural_key(&self) -> String { self.name.clone() }
/// }
/// ```
pub trait Model:
    Sized + Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Store namespace for this type (e.g., "Juvenile", "Post")
    fn model_name() -> &'static str;

    /// Storage identifier of this instance
    fn model_id(&self) -> &str;

    /// Key used to match local and remote copies during reconciliation.
    /// Defaults to the storage identifier.
    fn natural_key(&self) -> String {
        self.model_id().to_string()
    }

    /// Combine a fresh remote copy with the existing local one.
    ///
    /// Override to carry local-only fields across a remote refresh.
    fn merge_remote(remote: Self, _local: &Self) -> Self {
        remote
    }
}

/// Trait for models that the backend can list.
///
/// Maps the type to its listing endpoint at compile time and decodes the
/// listing payload, which does not always match the stored shape.
pub trait RemoteModel: Model {
    /// Endpoint returning every instance
    fn list_endpoint() -> Endpoint;

    /// Decode a listing response
    fn decode_listing(value: serde_json::Value) -> Result<Vec<Self>> {
        Ok(serde_json::from_value(value)?)
    }
}
