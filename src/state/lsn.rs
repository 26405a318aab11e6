//! Replication positions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A write-ahead log position. Higher means more advanced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    /// Bytes by which `self` trails `ahead`, zero when `self` is not behind.
    pub fn lag_behind(self, ahead: Lsn) -> u64 {
        ahead.0.saturating_sub(self.0)
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid LSN {0:?}, expected the form X/X")]
pub struct ParseLsnError(pub String);

impl FromStr for Lsn {
    type Err = ParseLsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (high, low) = trimmed
            .split_once('/')
            .ok_or_else(|| ParseLsnError(trimmed.to_string()))?;
        let high = u32::from_str_radix(high, 16).map_err(|_| ParseLsnError(trimmed.to_string()))?;
        let low = u32::from_str_radix(low, 16).map_err(|_| ParseLsnError(trimmed.to_string()))?;
        Ok(Lsn(((high as u64) << 32) | low as u64))
    }
}
