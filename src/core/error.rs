use thiserror::Error;

/// Universal error type for raster output operations.
///
/// Almost every drawing entry point degrades silently on bad input; only
/// the operations that cannot proceed at all (allocating the page canvas,
/// loading a font program on request) report one of these.
#[derive(Debug, Clone, Error)]
pub enum RasterError {
    /// The page (or another mandatory) canvas could not be allocated
    #[error("Cannot allocate {width}x{height} canvas")]
    CanvasAllocation { width: usize, height: usize },

    /// A transform, bounding box or size was unusable
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// An embedded font program could not be parsed
    #[error("Font load failed: {0}")]
    FontLoad(String),

    /// The color space cannot be rendered into the active color mode
    #[error("Unsupported color space: {0}")]
    UnsupportedColorSpace(String),

    /// An operation arrived in a state where it is not valid
    #[error("State violation: {0}")]
    StateViolation(String),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Result type alias for raster operations
pub type RasterResult<T> = Result<T, RasterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = RasterError::CanvasAllocation {
            width: 10,
            height: 20,
        };
        assert_eq!(err.to_string(), "Cannot allocate 10x20 canvas");
        assert_eq!(RasterError::Generic("boom".into()).to_string(), "boom");
    }
}
