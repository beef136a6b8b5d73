//! Record types shared by the store, the remote API and the queue
//!
//! The backend sends numeric ids for some records and string ids for others,
//! and behaviors reference their location by name only. The wire helpers in
//! this module normalise both into the stored shape.

use crate::api::Endpoint;
use crate::error::Result;
use crate::traits::{Model, RemoteModel};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Accepts `12` or `"12"` and yields `"12"`.
fn flexible_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Int(i64),
        Str(String),
    }

    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Int(n) => n.to_string(),
        IdRepr::Str(s) => s,
    })
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// =============================================================================
// Location
// =============================================================================

/// A place a behavior applies to. The backend only knows locations by name,
/// so the name doubles as the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
}

impl Location {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
        }
    }
}

impl Model for Location {
    fn model_name() -> &'static str {
        "Location"
    }

    fn model_id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> String {
        self.name.clone()
    }
}

impl RemoteModel for Location {
    fn list_endpoint() -> Endpoint {
        Endpoint::ListLocations
    }

    /// The location listing is a bare array of names.
    fn decode_listing(value: serde_json::Value) -> Result<Vec<Self>> {
        let names: Vec<String> = serde_json::from_value(value)?;
        Ok(names.into_iter().map(Location::named).collect())
    }
}

// =============================================================================
// Category
// =============================================================================

/// Behavior category, cycled through by the selection UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Category {
    #[default]
    Safe,
    Responsible,
    Considerate,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Safe, Category::Responsible, Category::Considerate];

    /// Next category in the cycle, wrapping back to `Safe`.
    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|c| *c == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Safe => "Safe",
            Category::Responsible => "Responsible",
            Category::Considerate => "Considerate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "safe" => Some(Category::Safe),
            "responsible" => Some(Category::Responsible),
            "considerate" => Some(Category::Considerate),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Category::from_name(&name).unwrap_or_default())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Behavior
// =============================================================================

/// A behavior points can be awarded for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BehaviorWire")]
pub struct Behavior {
    pub id: String,
    pub title: String,
    pub location: Location,
    pub category: Category,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationWire {
    Name(String),
    Full(Location),
}

#[derive(Deserialize)]
struct BehaviorWire {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    title: String,
    location: LocationWire,
    #[serde(default)]
    category: Category,
}

impl From<BehaviorWire> for Behavior {
    fn from(wire: BehaviorWire) -> Self {
        let location = match wire.location {
            LocationWire::Name(name) => Location::named(name),
            LocationWire::Full(location) => location,
        };
        Self {
            id: wire.id,
            title: wire.title,
            location,
            category: wire.category,
        }
    }
}

impl Model for Behavior {
    fn model_name() -> &'static str {
        "Behavior"
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

impl RemoteModel for Behavior {
    fn list_endpoint() -> Endpoint {
        Endpoint::ListBehaviors
    }
}

// =============================================================================
// Juvenile
// =============================================================================

/// A student tracked by the scanner.
///
/// `is_enqueued` is local state only: the backend never sends it, and a
/// remote refresh keeps whatever the device already had.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Juvenile {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub points: i64,
    pub event_id: i64,
    #[serde(default)]
    pub active: i64,
    #[serde(default, rename = "isEnqueued", alias = "is_enqueued")]
    pub is_enqueued: bool,
}

impl Juvenile {
    pub fn is_active(&self) -> bool {
        self.active == 1
    }

    /// Membership predicate of the scan queue
    pub fn belongs_in_queue(&self) -> bool {
        self.is_enqueued && self.is_active()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl Model for Juvenile {
    fn model_name() -> &'static str {
        "Juvenile"
    }

    fn model_id(&self) -> &str {
        &self.id
    }

    fn merge_remote(mut remote: Self, local: &Self) -> Self {
        remote.is_enqueued = local.is_enqueued;
        remote
    }
}

impl RemoteModel for Juvenile {
    fn list_endpoint() -> Endpoint {
        Endpoint::ListJuveniles
    }
}

// =============================================================================
// Post
// =============================================================================

/// A behavior submission that has not been acknowledged by the backend yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub juvenile_id: String,
    pub behavior_id: String,
    /// Timestamp when queued (ms since epoch)
    #[serde(default)]
    pub queued_at: u64,
}

impl Post {
    pub fn new(juvenile_id: impl Into<String>, behavior_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            juvenile_id: juvenile_id.into(),
            behavior_id: behavior_id.into(),
            queued_at: now_millis(),
        }
    }
}

impl Model for Post {
    fn model_name() -> &'static str {
        "Post"
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

// =============================================================================
// Purchase
// =============================================================================

/// One line of a juvenile's point transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: i64,
}

impl Purchase {
    pub fn total(&self) -> i64 {
        self.quantity * self.unit_price
    }
}
