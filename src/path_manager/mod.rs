//! Path Manager (§4.E).
//!
//! Idempotent provisioning of media-server stream paths. Deliberately
//! stateless beyond what `MediaMtxClient` already holds: every operation
//! re-reads status from the media server rather than caching it locally,
//! per §4.E "maintains no persistent local state beyond what the media
//! server reports".

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::mediamtx::{MediaMtxClient, StreamConfig, StreamStatus, StreamUrls};

/// Stream name for a numeric camera id, per §4.B's `/dev/videoN → cameraN`
/// mapping generalized to path-manager's own `cam<id>` convention (§4.E,
/// §8 scenario 1: `camera_id=0` provisions `cam0`).
pub fn stream_name_for_camera(camera_id: u32) -> String {
    format!("cam{camera_id}")
}

pub struct PathManager {
    client: Arc<MediaMtxClient>,
}

impl PathManager {
    pub fn new(client: Arc<MediaMtxClient>) -> Self {
        Self { client }
    }

    /// `ensure_path(camera_id, device_path)`: idempotent create against the
    /// device's local RTSP source. Returns the stream's public URLs.
    pub async fn ensure_path(&self, camera_id: u32, device_path: &str, correlation_id: &str) -> Result<StreamUrls> {
        let name = stream_name_for_camera(camera_id);
        let source = local_rtsp_source(device_path);
        let config = StreamConfig {
            name: name.clone(),
            source,
            record: false,
            record_path: None,
        };
        let urls = self.client.create_stream(&config, correlation_id).await?;
        info!(path = %name, device = %device_path, "path ensured");
        Ok(urls)
    }

    /// Delete tolerates a missing path (§4.E "deletion tolerates missing
    /// paths"); `MediaMtxClient::delete_stream` already treats 404 as success.
    pub async fn delete_path(&self, camera_id: u32, correlation_id: &str) -> Result<()> {
        let name = stream_name_for_camera(camera_id);
        match self.client.delete_stream(&name, correlation_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(path = %name, error = %err, "path deletion failed");
                Err(err)
            }
        }
    }

    /// Re-reads status directly from the media server; never cached.
    pub async fn status(&self, camera_id: u32, correlation_id: &str) -> Result<StreamStatus> {
        let name = stream_name_for_camera(camera_id);
        self.client.get_stream_status(&name, correlation_id).await
    }

    pub fn urls_for_camera(&self, camera_id: u32) -> StreamUrls {
        self.client.urls_for(&stream_name_for_camera(camera_id))
    }
}

/// A locally-published RTSP source descriptor for a capture device. The
/// actual RTSP publisher (e.g. ffmpeg pushing the device into MediaMTX) is
/// an external collaborator (§1 out-of-scope "the external snapshot/
/// recording encoder process"); the path manager only names the source the
/// media server should expect.
fn local_rtsp_source(device_path: &str) -> String {
    format!("publisher:{device_path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_follows_cam_id_convention() {
        assert_eq!(stream_name_for_camera(0), "cam0");
        assert_eq!(stream_name_for_camera(7), "cam7");
    }

    #[test]
    fn local_source_names_the_device_path() {
        assert_eq!(local_rtsp_source("/dev/video0"), "publisher:/dev/video0");
    }
}
