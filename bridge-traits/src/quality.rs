//! Audio quality tiers.
//!
//! Quality ids travel between the core, the resolver and the configuration,
//! so they are a closed enum with exhaustive string conversion instead of raw
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named bitrate/format tier, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Standard,
    Higher,
    #[serde(rename = "exhigh")]
    ExHigh,
    Lossless,
    #[serde(rename = "hires")]
    HiRes,
    /// Surround effect mix. Not part of the bitrate ladder.
    #[serde(rename = "jyeffect")]
    Effect,
    Sky,
    #[serde(rename = "jymaster")]
    Master,
}

/// Descending ladder used when a tier is not available for a track.
const FALLBACK_LADDER: [Quality; 7] = [
    Quality::Master,
    Quality::Sky,
    Quality::HiRes,
    Quality::Lossless,
    Quality::ExHigh,
    Quality::Higher,
    Quality::Standard,
];

impl Quality {
    pub const ALL: [Quality; 8] = [
        Quality::Standard,
        Quality::Higher,
        Quality::ExHigh,
        Quality::Lossless,
        Quality::HiRes,
        Quality::Effect,
        Quality::Sky,
        Quality::Master,
    ];

    /// Wire id understood by the resolver.
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::Higher => "higher",
            Quality::ExHigh => "exhigh",
            Quality::Lossless => "lossless",
            Quality::HiRes => "hires",
            Quality::Effect => "jyeffect",
            Quality::Sky => "sky",
            Quality::Master => "jymaster",
        }
    }

    /// This tier followed by every lower tier worth trying.
    pub fn fallback_chain(&self) -> Vec<Quality> {
        let mut chain = vec![*self];
        chain.extend(
            FALLBACK_LADDER
                .iter()
                .copied()
                .filter(|candidate| candidate < self),
        );
        chain
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::ExHigh
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown quality id: {0}")]
pub struct UnknownQuality(pub String);

impl FromStr for Quality {
    type Err = UnknownQuality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Quality::ALL
            .iter()
            .copied()
            .find(|q| q.as_str() == normalized)
            .ok_or_else(|| UnknownQuality(s.to_string()))
    }
}
