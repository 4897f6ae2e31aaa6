//! Cluster protocol generations
//!
//! Each variant names a wire dialect: the request DSL it accepts and the
//! response shape it produces. The version is fixed when a dispatcher is built.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::EsCompatError;

/// Wire dialect of the target cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ProtocolVersion {
    V1_7,
    V2_3,
    #[default]
    V5_6,
    V6_8,
    V7_9,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 5] = [
        Self::V1_7,
        Self::V2_3,
        Self::V5_6,
        Self::V6_8,
        Self::V7_9,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1_7 => "v1.7",
            Self::V2_3 => "v2.3",
            Self::V5_6 => "v5.6",
            Self::V6_8 => "v6.8",
            Self::V7_9 => "v7.9",
        }
    }

    /// Newest generation: typeless API and `{value, relation}` hit totals
    pub fn is_newest(&self) -> bool {
        matches!(self, Self::V7_9)
    }

    pub fn is_oldest(&self) -> bool {
        matches!(self, Self::V1_7)
    }

    /// Whether document types still appear in paths and bulk metadata
    pub fn has_doc_types(&self) -> bool {
        !self.is_newest()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = EsCompatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_start_matches(['v', 'V'])
            .replace('_', ".");
        match normalized.as_str() {
            "1.7" => Ok(Self::V1_7),
            "2.3" => Ok(Self::V2_3),
            "5.6" => Ok(Self::V5_6),
            "6.8" => Ok(Self::V6_8),
            "7.9" => Ok(Self::V7_9),
            _ => Err(EsCompatError::config(format!(
                "unsupported protocol version '{s}'"
            ))),
        }
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
