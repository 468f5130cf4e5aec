// src/core/feed/mod.rs

//! The push pipeline: building feed XML, delivering it to the indexer, and
//! orchestrating batched pushes with retry and archiving.

pub mod docid_sender;
pub mod sender;
pub mod xml;

use crate::core::errors::FeedgateError;
use std::str::FromStr;

/// A dotted indexer version such as `7.4.0-1`. Only the numeric components
/// participate in ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct GsaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl GsaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
        }
    }
}

impl FromStr for GsaVersion {
    type Err = FeedgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(['.', '-']).collect();
        let parse = |idx: usize| -> Result<u32, FeedgateError> {
            parts
                .get(idx)
                .unwrap_or(&"0")
                .parse()
                .map_err(|_| {
                    FeedgateError::InvalidConfiguration(format!("invalid gsa.version '{s}'"))
                })
        };
        Ok(GsaVersion {
            major: parse(0)?,
            minor: parse(1)?,
            patch: parse(2)?,
            build: parse(3)?,
        })
    }
}

impl std::fmt::Display for GsaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}-{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}
