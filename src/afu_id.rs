use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::Error;

/// 128-bit identifier an AFU reports in its header and the driver exposes
/// in sysfs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AfuId(Uuid);

impl AfuId {
    pub const fn from_u128(v: u128) -> AfuId {
        AfuId(Uuid::from_u128(v))
    }

    /// Assemble the id from the `AFU_ID_H` / `AFU_ID_L` header registers.
    pub fn from_halves(high: u64, low: u64) -> AfuId {
        AfuId(Uuid::from_u128(((high as u128) << 64) | low as u128))
    }

    pub fn high(&self) -> u64 {
        (self.0.as_u128() >> 64) as u64
    }

    pub fn low(&self) -> u64 {
        self.0.as_u128() as u64
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl FromStr for AfuId {
    type Err = Error;

    // accepts both the hyphenated form and the bare hex digits sysfs uses
    fn from_str(s: &str) -> Result<AfuId, Error> {
        Uuid::parse_str(s.trim())
            .map(AfuId)
            .map_err(|_| Error::InvalidAfuId(s.to_string()))
    }
}

impl fmt::Display for AfuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for AfuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AfuId({})", self.0.hyphenated())
    }
}
