//! Batch markers, storage tiers, and the boundaries between them.
//!
//! A [`Marker`] is the unit of incremental catch-up: every row written by one
//! load or one reconciliation step carries the same marker, and downstream
//! rows point back at the upstream marker they were derived from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, totally ordered batch identity.
///
/// Markers come from a single monotonic counter owned by the store, so two
/// batches never share one even when runs happen within the same clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(i64);

impl Marker {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for Marker {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Quality-graded storage stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Raw, append-only ingested rows.
    Bronze,
    /// Rows deduplicated per raw batch.
    Silver,
    /// Aggregates per cleaned batch.
    Gold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Bronze, Tier::Silver, Tier::Gold];

    /// Schema (namespace) the tier's relation lives in.
    pub fn namespace(self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Tier::Bronze => "raw_bookings",
            Tier::Silver => "bookings_cleaned",
            Tier::Gold => "booking_summary",
        }
    }

    /// Fully qualified `namespace.table` name.
    pub fn qualified_table(self) -> String {
        format!("{}.{}", self.namespace(), self.table())
    }

    /// Column holding the marker this tier stamps on its own rows.
    pub fn marker_column(self) -> &'static str {
        match self {
            Tier::Bronze => "ingested_at",
            Tier::Silver => "cleaned_at",
            Tier::Gold => "summarized_at",
        }
    }

    /// Column holding the upstream marker a row was derived from.
    ///
    /// Bronze has no upstream tier.
    pub fn back_reference_column(self) -> Option<&'static str> {
        match self {
            Tier::Bronze => None,
            Tier::Silver => Some("source_ingested_at"),
            Tier::Gold => Some("source_cleaned_at"),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bronze" | "raw" => Ok(Tier::Bronze),
            "silver" | "cleaned" => Ok(Tier::Silver),
            "gold" | "summary" => Ok(Tier::Gold),
            other => Err(format!("unknown tier '{other}' (expected bronze, silver or gold)")),
        }
    }
}

/// A one-directional step between two adjacent tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    BronzeToSilver,
    SilverToGold,
}

impl Boundary {
    pub const ALL: [Boundary; 2] = [Boundary::BronzeToSilver, Boundary::SilverToGold];

    pub fn source(self) -> Tier {
        match self {
            Boundary::BronzeToSilver => Tier::Bronze,
            Boundary::SilverToGold => Tier::Silver,
        }
    }

    pub fn destination(self) -> Tier {
        match self {
            Boundary::BronzeToSilver => Tier::Silver,
            Boundary::SilverToGold => Tier::Gold,
        }
    }

    /// Stable name used in logs and in the settled-marker ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            Boundary::BronzeToSilver => "bronze_to_silver",
            Boundary::SilverToGold => "silver_to_gold",
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
