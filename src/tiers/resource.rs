//! Tracked resources and their limits.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire sentinel for an unlimited resource.
pub const UNLIMITED_SENTINEL: i64 = -1;

/// A consumable, per-subscriber resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Document storage, in megabytes.
    Storage,
    /// AI chat tokens.
    Tokens,
    /// Uploaded document count.
    Documents,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Storage, Resource::Tokens, Resource::Documents];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Tokens => "tokens",
            Self::Documents => "documents",
        }
    }

    /// Denial reason code, e.g. `storage_limit_exceeded`.
    pub fn limit_exceeded_reason(&self) -> String {
        format!("{}_limit_exceeded", self.as_str())
    }

    /// Render an amount of this resource in human units.
    pub fn format_amount(&self, amount: u64) -> String {
        match self {
            Self::Storage if amount >= 1024 => {
                format!("{:.1} GB", amount as f64 / 1024.0)
            }
            Self::Storage => format!("{} MB", amount),
            Self::Tokens => format!("{} tokens", group_thousands(amount)),
            Self::Documents if amount == 1 => "1 document".to_string(),
            Self::Documents => format!("{} documents", group_thousands(amount)),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Maximum allowed value for a resource within a billing period.
///
/// Serialized as a signed integer where `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    Unlimited,
    Capped(u64),
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    pub fn capped(&self) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::Capped(max) => Some(*max),
        }
    }

    /// Usage as a percentage of this limit.
    ///
    /// Unlimited always yields `0.0`. A zero cap yields `100.0` once anything
    /// is used, since nothing fits.
    pub fn percentage(&self, used: u64) -> f64 {
        match self {
            Self::Unlimited => 0.0,
            Self::Capped(0) if used == 0 => 0.0,
            Self::Capped(0) => 100.0,
            Self::Capped(max) => used as f64 / *max as f64 * 100.0,
        }
    }

    /// Whether `used` fits within this limit.
    pub fn allows(&self, used: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Capped(max) => used <= *max,
        }
    }

    pub fn to_sentinel(&self) -> i64 {
        match self {
            Self::Unlimited => UNLIMITED_SENTINEL,
            Self::Capped(max) => i64::try_from(*max).unwrap_or(i64::MAX),
        }
    }

    pub fn from_sentinel(value: i64) -> Option<Self> {
        match value {
            UNLIMITED_SENTINEL => Some(Self::Unlimited),
            v if v >= 0 => Some(Self::Capped(v as u64)),
            _ => None,
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_sentinel())
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Limit::from_sentinel(raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid limit {raw}: expected -1 or >= 0"))
        })
    }
}
