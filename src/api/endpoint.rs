//! Typed endpoints of the PBIS backend
//!
//! Every remote call is one [`Endpoint`] variant. The variant fully determines
//! the path, method, query string and body, so the mapping from request kind
//! to wire shape is fixed at compile time.

use crate::error::{Result, SyncError};
use serde_json::json;
use std::fmt;

/// HTTP method of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of a request
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescriptor {
    /// Path relative to the API base URL, with a leading slash
    pub path: &'static str,
    pub method: HttpMethod,
    /// JSON body, if any
    pub body: Option<serde_json::Value>,
    /// Query parameters, unencoded
    pub query: Vec<(&'static str, String)>,
}

impl EndpointDescriptor {
    fn new(method: HttpMethod, path: &'static str) -> Self {
        Self {
            path,
            method,
            body: None,
            query: Vec::new(),
        }
    }

    fn with_query(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Path plus URL-encoded query string
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.to_string();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.path, query)
    }
}

/// A remote request kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Every behavior
    ListBehaviors,
    /// Every location name
    ListLocations,
    /// Every juvenile
    ListJuveniles,
    /// Juveniles registered under a scanned event code
    JuvenileByEventId { event_id: i64 },
    /// Reactivate a juvenile for an event code
    ActivateJuvenile { event_id: i64, juvenile_id: String },
    /// Award the points of one behavior to one juvenile
    IncrementPoints { juvenile_id: i64, behavior_id: i64 },
    /// Purchase history of a juvenile
    JuvenileTransactions { juvenile_id: String },
}

impl Endpoint {
    /// Build an increment request from stored string ids.
    ///
    /// The backend only accepts numeric ids here; anything else is a
    /// malformed request.
    pub fn increment_points(juvenile_id: &str, behavior_id: &str) -> Result<Self> {
        let parse = |field: &str, value: &str| {
            value.trim().parse::<i64>().map_err(|_| {
                SyncError::RequestMalformed(format!("{} is not numeric: {:?}", field, value))
            })
        };
        Ok(Endpoint::IncrementPoints {
            juvenile_id: parse("juvenile_id", juvenile_id)?,
            behavior_id: parse("behavior_id", behavior_id)?,
        })
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::ListBehaviors => "list_behaviors",
            Endpoint::ListLocations => "list_locations",
            Endpoint::ListJuveniles => "list_juveniles",
            Endpoint::JuvenileByEventId { .. } => "juvenile_by_event_id",
            Endpoint::ActivateJuvenile { .. } => "activate_juvenile",
            Endpoint::IncrementPoints { .. } => "increment_points",
            Endpoint::JuvenileTransactions { .. } => "juvenile_transactions",
        }
    }

    pub fn descriptor(&self) -> EndpointDescriptor {
        match self {
            Endpoint::ListBehaviors => EndpointDescriptor::new(HttpMethod::Get, "/behavior"),
            Endpoint::ListLocations => EndpointDescriptor::new(HttpMethod::Get, "/location"),
            Endpoint::ListJuveniles => EndpointDescriptor::new(HttpMethod::Get, "/juvenile"),
            Endpoint::JuvenileByEventId { event_id } => {
                EndpointDescriptor::new(HttpMethod::Get, "/juvenile").with_query("event_id", event_id)
            }
            // The activate call takes both ids as strings
            Endpoint::ActivateJuvenile {
                event_id,
                juvenile_id,
            } => EndpointDescriptor::new(HttpMethod::Put, "/juvenile/activate").with_body(json!({
                "event_id": event_id.to_string(),
                "juvenile_id": juvenile_id,
            })),
            Endpoint::IncrementPoints {
                juvenile_id,
                behavior_id,
            } => EndpointDescriptor::new(HttpMethod::Post, "/juvenile/incr").with_body(json!({
                "juvenile_id": juvenile_id,
                "behavior_id": behavior_id,
            })),
            Endpoint::JuvenileTransactions { juvenile_id } => {
                EndpointDescriptor::new(HttpMethod::Get, "/juvenile/transactions")
                    .with_query("juvenile_id", juvenile_id)
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let descriptor = self.descriptor();
        write!(f, "{} {}", descriptor.method, descriptor.path_and_query())
    }
}
