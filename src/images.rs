//! Best-effort image dimension probing.
//!
//! When an `<img>` does not declare both `width` and `height`, the resolver
//! streams the first few kilobytes of the resource and reads the dimensions
//! from the format header. It never fails: any fetch or decode problem is
//! logged at debug level and reported as unknown dimensions.

use thiserror::Error;
use tracing::{debug, instrument};

use crate::fetch::{FetchClient, FetchError};

/// Upper bound on bytes read per probe. Every common format puts its
/// dimensions well inside this, JPEG with large EXIF blocks included.
const MAX_PROBE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
enum ImageProbeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("could not read image header: {0}")]
    Decode(String),

    #[error("image dimensions out of range")]
    Overflow,
}

/// Resolves `(width, height)` for undeclared images.
#[derive(Debug, Clone, Copy)]
pub struct ImageResolver<'a> {
    client: &'a FetchClient,
    enabled: bool,
}

impl<'a> ImageResolver<'a> {
    /// Creates a resolver; a disabled resolver answers `(None, None)`
    /// without touching the network.
    pub fn new(client: &'a FetchClient, enabled: bool) -> Self {
        Self { client, enabled }
    }

    /// Returns the pixel dimensions of `src`, or `(None, None)`.
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, src: &str) -> (Option<u32>, Option<u32>) {
        if !self.enabled {
            return (None, None);
        }
        match self.probe(src).await {
            Ok((w, h)) => (Some(w), Some(h)),
            Err(e) => {
                debug!(%src, error = %e, "Image probe failed");
                (None, None)
            }
        }
    }

    async fn probe(&self, src: &str) -> Result<(u32, u32), ImageProbeError> {
        let bytes = self
            .client
            .fetch_prefix(src, MAX_PROBE_BYTES, |buf| imagesize::blob_size(buf).is_ok())
            .await?;
        let size = imagesize::blob_size(&bytes).map_err(|e| ImageProbeError::Decode(e.to_string()))?;
        let width = u32::try_from(size.width).map_err(|_| ImageProbeError::Overflow)?;
        let height = u32::try_from(size.height).map_err(|_| ImageProbeError::Overflow)?;
        Ok((width, height))
    }
}
