use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

macro_rules! name_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(MessageId);

name_newtype!(UserId);
name_newtype!(ChannelName);

/// The single global channel every participant posts into.
pub const DEFAULT_CHANNEL: &str = "messages";

impl Default for ChannelName {
    fn default() -> Self {
        Self(DEFAULT_CHANNEL.to_string())
    }
}

/// Logical write time assigned by the store, in microseconds since the Unix epoch.
///
/// The store guarantees every newly assigned value is strictly greater than the
/// previous one, so two messages never compare equal unless they were written
/// by a backend with a coarser clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_micros())
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_micros(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_label: String,
}

/// The signed-in principal, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn maps_url(&self) -> String {
        format!("https://www.google.com/maps?q={},{}", self.lat, self.lng)
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
