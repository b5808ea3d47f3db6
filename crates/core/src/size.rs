//! Target image size parsing.
//!
//! Sizes travel through the system as `"{width}x{height}"` strings (the
//! format the upstream workflow UI stores) and are parsed once before a
//! batch starts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Pixel dimensions of a generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Default generation size when the caller does not specify one.
pub const DEFAULT_IMAGE_SIZE: ImageSize = ImageSize {
    width: 512,
    height: 512,
};

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        DEFAULT_IMAGE_SIZE
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ImageSize {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Validation(format!("Invalid image size '{s}', expected WxH"));

        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;

        if width == 0 || height == 0 {
            return Err(CoreError::Validation(format!(
                "Image size '{s}' must have non-zero dimensions"
            )));
        }

        Ok(Self { width, height })
    }
}
