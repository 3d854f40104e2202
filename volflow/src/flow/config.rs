//! Chunked flow configuration.

use super::error::FlowError;
use crate::geometry::{IntVec3D, SnapMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Defaults
// =============================================================================

/// Maximum outcomes requested per poll.
pub const DEFAULT_PULL_MAX_NUM: usize = 500;

/// Wall-clock budget per poll (2.5 seconds).
pub const DEFAULT_PULL_MAX_TIME_MS: u64 = 2500;

/// Pause between polls that returned nothing.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// How the target index is reconciled with the destination's chunk grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Reject an index that is not chunk-aligned.
    #[default]
    Validate,
    /// Grow the index to the enclosing chunk boundaries.
    Expand,
    /// Shrink the index to the enclosed chunk boundaries.
    Shrink,
}

impl Alignment {
    /// Snap mode for the non-validating variants.
    pub fn snap_mode(&self) -> Option<SnapMode> {
        match self {
            Self::Validate => None,
            Self::Expand => Some(SnapMode::Expand),
            Self::Shrink => Some(SnapMode::Shrink),
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validate => write!(f, "validate"),
            Self::Expand => write!(f, "expand"),
            Self::Shrink => write!(f, "shrink"),
        }
    }
}

impl FromStr for Alignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "validate" => Ok(Self::Validate),
            "expand" => Ok(Self::Expand),
            "shrink" => Ok(Self::Shrink),
            other => Err(format!("unknown alignment '{}'", other)),
        }
    }
}

/// Parameters of a [`ChunkedFlow`](super::ChunkedFlow).
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkedFlowConfig {
    /// Tile size in voxels.
    pub chunk_size: IntVec3D,
    /// Distance between tiles; equal to `chunk_size` unless tiles overlap.
    pub step_size: IntVec3D,
    /// Extra context read around each tile and cropped before writing.
    pub crop_pad: IntVec3D,
    pub alignment: Alignment,
    /// Routing tags attached to every task.
    pub tags: Vec<String>,
    pub pull_max_num: usize,
    pub pull_max_time: Duration,
    pub poll_interval: Duration,
}

impl ChunkedFlowConfig {
    /// Non-overlapping tiles of `chunk_size` with default polling.
    pub fn new(chunk_size: IntVec3D) -> Self {
        Self {
            chunk_size,
            step_size: chunk_size,
            crop_pad: IntVec3D::ZERO,
            alignment: Alignment::default(),
            tags: Vec::new(),
            pull_max_num: DEFAULT_PULL_MAX_NUM,
            pull_max_time: Duration::from_millis(DEFAULT_PULL_MAX_TIME_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    pub fn with_step_size(mut self, step_size: IntVec3D) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn with_crop_pad(mut self, crop_pad: IntVec3D) -> Self {
        self.crop_pad = crop_pad;
        self
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pull_max_num(mut self, max_num: usize) -> Self {
        self.pull_max_num = max_num;
        self
    }

    pub fn with_pull_max_time(mut self, max_time: Duration) -> Self {
        self.pull_max_time = max_time;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks the settings the chunker does not.
    pub fn validate(&self) -> Result<(), FlowError> {
        if !self.crop_pad.is_non_negative() {
            return Err(FlowError::Config(format!(
                "crop pad {} must not be negative",
                self.crop_pad
            )));
        }
        if self.pull_max_num == 0 {
            return Err(FlowError::Config(
                "pull_max_num must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChunkedFlowConfig::new(IntVec3D::new(64, 64, 16));
        assert_eq!(config.step_size, config.chunk_size);
        assert_eq!(config.crop_pad, IntVec3D::ZERO);
        assert_eq!(config.alignment, Alignment::Validate);
        assert_eq!(config.pull_max_num, 500);
        assert_eq!(config.pull_max_time, Duration::from_millis(2500));
    }

    #[test]
    fn test_validate() {
        let config = ChunkedFlowConfig::new(IntVec3D::splat(8));
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.clone().with_pull_max_num(0).validate(),
            Err(FlowError::Config(_))
        ));
        assert!(matches!(
            config.with_crop_pad(IntVec3D::new(0, -1, 0)).validate(),
            Err(FlowError::Config(_))
        ));
    }

    #[test]
    fn test_alignment_parse() {
        assert_eq!("Expand".parse::<Alignment>(), Ok(Alignment::Expand));
        assert_eq!(Alignment::Shrink.to_string(), "shrink");
        assert_eq!(Alignment::Shrink.snap_mode(), Some(SnapMode::Shrink));
        assert!("round".parse::<Alignment>().is_err());
    }
}
