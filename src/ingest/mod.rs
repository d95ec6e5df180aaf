//! Frame ingestion sources.
//!
//! This module provides different sources for camera frames:
//! - HTTP MJPEG streams and JPEG snapshot endpoints (ESP32-CAM style)
//! - Local directories of JPEG files (replay)
//! - Synthetic `stub://` frames (dry runs and tests)
//!
//! Every source produces `Frame` values already resized to the configured
//! working resolution. A source is opened once per detection session and is
//! never reopened mid-session: a dead stream ends the session.
//!
//! `next_frame` distinguishes three outcomes:
//! - `Ok(Some(frame))`: a frame (which may still be empty, see `Frame::is_empty`)
//! - `Ok(None)`: the stream ended cleanly
//! - `Err(_)`: the read failed

mod mjpeg;
mod replay;

use anyhow::Result;

use crate::config::StreamSettings;
use crate::frame::Frame;

pub use mjpeg::{MjpegConfig, MjpegSource};
pub use replay::{ReplayConfig, ReplaySource};

/// A source of camera frames.
pub trait FrameSource: Send {
    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;

    /// Connect to the underlying stream. Failing here means the session cannot start.
    fn open(&mut self) -> Result<()>;

    /// Capture the next frame.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the underlying stream. Safe to call more than once.
    fn close(&mut self) {}
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Build a source for the configured stream URI.
///
/// `http(s)://` URIs use the MJPEG source; `stub://` URIs and local paths use replay.
pub fn open_source(settings: &StreamSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        let config = MjpegConfig {
            url: url.to_string(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            read_timeout: settings.read_timeout,
        };
        return Ok(Box::new(MjpegSource::new(config)?));
    }
    let config = ReplayConfig {
        path: url.to_string(),
        width: settings.width,
        height: settings.height,
    };
    Ok(Box::new(ReplaySource::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(url: &str) -> StreamSettings {
        StreamSettings {
            url: url.to_string(),
            target_fps: 10,
            width: 64,
            height: 36,
            read_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn picks_source_by_scheme() {
        let source = open_source(&settings("stub://closet")).unwrap();
        assert_eq!(source.describe(), "replay:stub://closet");

        let source = open_source(&settings("http://10.0.0.34:81/stream")).unwrap();
        assert_eq!(source.describe(), "mjpeg:http://10.0.0.34:81/stream");
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(open_source(&settings("rtsp://camera/stream")).is_err());
    }
}
