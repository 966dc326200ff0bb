//! Decoded samples and their textual encoding.
//!
//! A sample is the pair `(offset / line_length, offset % line_length)` plus the
//! auxiliary input captured with the pulse. Downstream consumers read it as
//! three comma-separated integers terminated by a newline: `major,minor,aux\n`.

use lightpen_common::{LightpenError, LightpenResult, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One decoded measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    /// Time of the accepted pulse edge.
    pub timestamp: Timestamp,
    /// Pulse time minus the governing reference time, in microseconds.
    pub offset_us: i64,
    /// `offset / line_length` (the video line for a lightpen).
    pub major: u64,
    /// `offset % line_length` (position within the line).
    pub minor: u32,
    /// Auxiliary input level captured at pulse time (pen button).
    pub aux: bool,
}

impl Sample {
    /// Decode a non-negative offset into a sample.
    ///
    /// Returns `None` for a negative offset or a zero period; such pulses must never
    /// be published.
    #[must_use]
    pub fn decode(
        timestamp: Timestamp,
        offset_us: i64,
        line_length: u32,
        aux: bool,
    ) -> Option<Self> {
        if offset_us < 0 || line_length == 0 {
            return None;
        }
        let offset = offset_us.unsigned_abs();
        let period = u64::from(line_length);
        Some(Self {
            timestamp,
            offset_us,
            major: offset / period,
            // remainder is strictly below line_length, which is a u32
            minor: u32::try_from(offset % period).ok()?,
            aux,
        })
    }

    /// Textual encoding consumed downstream: `major,minor,aux\n`.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{},{},{}", self.major, self.minor, u8::from(self.aux))
    }
}

/// Position fields parsed back from the textual encoding.
///
/// The encoding carries only the decoded position and aux level, so the
/// timestamp and raw offset are not recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSample {
    /// Decoded major position.
    pub major: u64,
    /// Decoded minor position.
    pub minor: u32,
    /// Auxiliary input level.
    pub aux: bool,
}

impl From<Sample> for EncodedSample {
    fn from(s: Sample) -> Self {
        Self {
            major: s.major,
            minor: s.minor,
            aux: s.aux,
        }
    }
}

impl FromStr for EncodedSample {
    type Err = LightpenError;

    fn from_str(s: &str) -> LightpenResult<Self> {
        let line = s.strip_suffix('\n').unwrap_or(s);
        let mut fields = line.split(',');
        let mut next = |name: &str| {
            fields
                .next()
                .map(str::trim)
                .ok_or_else(|| LightpenError::Parse(format!("missing {name} field in {line:?}")))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let aux = next("aux")?;
        if fields.next().is_some() {
            return Err(LightpenError::Parse(format!("trailing fields in {line:?}")));
        }

        let major = major
            .parse()
            .map_err(|e| LightpenError::Parse(format!("major {major:?}: {e}")))?;
        let minor = minor
            .parse()
            .map_err(|e| LightpenError::Parse(format!("minor {minor:?}: {e}")))?;
        let aux = match aux {
            "0" => false,
            "1" => true,
            other => return Err(LightpenError::Parse(format!("aux {other:?} is not 0 or 1"))),
        };

        Ok(Self { major, minor, aux })
    }
}
