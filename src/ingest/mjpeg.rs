//! HTTP MJPEG frame source.
//!
//! ESP32-CAM boards serve `multipart/x-mixed-replace` MJPEG on `:81/stream` and
//! single JPEG snapshots on `/capture`. This source handles both, depending on
//! the response content type:
//! - Connecting once with a bounded connect/read timeout
//! - Splitting the multipart body on JPEG SOI/EOI markers
//! - Decoding and resizing frames in-memory, skipping corrupt parts
//! - Decimating to the configured frame rate

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
/// Corrupt parts tolerated in a row before the stream counts as broken.
const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 5;

/// Configuration for an HTTP MJPEG source.
#[derive(Clone, Debug)]
pub struct MjpegConfig {
    /// Stream URL, http(s) only.
    pub url: String,
    /// Target frame rate (frames per second). Source will decimate to this rate.
    pub target_fps: u32,
    /// Working resolution frames are resized to.
    pub width: u32,
    pub height: u32,
    /// Bound on connect and on each blocking read.
    pub read_timeout: Duration,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            target_fps: 10,
            width: 640,
            height: 360,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP MJPEG/JPEG frame source.
pub struct MjpegSource {
    config: MjpegConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    decode_failures: u32,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    /// Polled with one GET per frame; `pending` holds the body of the
    /// response that opened the source.
    Snapshot { pending: Option<Vec<u8>> },
}

impl MjpegSource {
    pub fn new(config: MjpegConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse stream url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported stream scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.read_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            decode_failures: 0,
            last_error: None,
        })
    }

    fn read_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("mjpeg source not opened; call open() first"))?;
        match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::Snapshot { pending } => match pending.take() {
                Some(bytes) => Ok(Some(bytes)),
                None => fetch_snapshot(&self.agent, &self.config.url).map(Some),
            },
        }
    }

    /// Snapshot mode fetches on demand, so wait out the frame interval instead
    /// of polling the camera and discarding the results.
    fn pace_snapshot(&self, min_interval: Duration) {
        if !matches!(self.stream, Some(HttpStream::Snapshot { .. })) {
            return;
        }
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                std::thread::sleep(min_interval - elapsed);
            }
        }
    }
}

impl FrameSource for MjpegSource {
    fn describe(&self) -> String {
        format!("mjpeg:{}", self.config.url)
    }

    fn open(&mut self) -> Result<()> {
        let response = match self.agent.get(&self.config.url).call() {
            Ok(response) => response,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(anyhow!("connect to stream {}: {}", self.config.url, err));
            }
        };
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            let reader: Box<dyn Read + Send> = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            let pending = read_snapshot_body(response)?;
            self.stream = Some(HttpStream::Snapshot {
                pending: Some(pending),
            });
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!(
            "mjpeg source connected to {} ({})",
            self.config.url,
            if content_type.contains("multipart") {
                "multipart stream"
            } else {
                "snapshot mode"
            }
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            self.pace_snapshot(min_interval);
            let jpeg_bytes = match self.read_jpeg() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Ok(None),
                Err(err) => {
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let frame = match Frame::decode(&jpeg_bytes, self.frame_count + 1) {
                Ok(frame) => frame,
                Err(err) => {
                    self.decode_failures += 1;
                    if self.decode_failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
                        self.last_error = Some(err.to_string());
                        return Err(err.context(format!(
                            "{} corrupt frames in a row from {}",
                            self.decode_failures, self.config.url
                        )));
                    }
                    log::warn!(
                        "skipping corrupt jpeg ({} bytes) from {}: {:#}",
                        jpeg_bytes.len(),
                        self.config.url,
                        err
                    );
                    continue;
                }
            };
            self.decode_failures = 0;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return frame
                .resized(self.config.width, self.config.height)
                .map(Some);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= self.config.read_timeout;
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("mjpeg source closed {}", self.config.url);
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG from the multipart body, or `None` once the body ends.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    read_snapshot_body(response)
}

fn read_snapshot_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn multipart(parts: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(part);
            body.extend_from_slice(b"\r\n");
        }
        body
    }

    #[test]
    fn finds_jpeg_between_markers() {
        let buffer = [0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x03];
        assert_eq!(find_jpeg_bounds(&buffer), Some((1, 7)));
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x01]), None);
        assert_eq!(find_jpeg_bounds(&[0x01, 0x02]), None);
    }

    #[test]
    fn splits_multipart_body_and_reports_end() {
        let first: &[u8] = &[0xFF, 0xD8, 0xAA, 0xFF, 0xD9];
        let second: &[u8] = &[0xFF, 0xD8, 0xBB, 0xBB, 0xFF, 0xD9];
        let body = multipart(&[first, second]);
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));

        assert_eq!(stream.read_next_jpeg().unwrap().as_deref(), Some(first));
        assert_eq!(stream.read_next_jpeg().unwrap().as_deref(), Some(second));
        assert_eq!(stream.read_next_jpeg().unwrap(), None);
    }

    #[test]
    fn rejects_non_http_urls() {
        let config = MjpegConfig {
            url: "udp://0.0.0.0:5000".to_string(),
            ..MjpegConfig::default()
        };
        assert!(MjpegSource::new(config).is_err());
    }

    #[test]
    fn unopened_source_is_unhealthy_and_cannot_read() {
        let mut source = MjpegSource::new(MjpegConfig::default()).unwrap();
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
    }

    fn grey_jpeg() -> Vec<u8> {
        Frame::new(vec![128u8; 16 * 16 * 3], 16, 16, 1)
            .encode_jpeg(80)
            .unwrap()
    }

    fn source_over(parts: &[&[u8]]) -> MjpegSource {
        let mut source = MjpegSource::new(MjpegConfig {
            target_fps: 0,
            width: 16,
            height: 16,
            ..MjpegConfig::default()
        })
        .unwrap();
        let body = multipart(parts);
        source.stream = Some(HttpStream::Mjpeg(MjpegStream::new(Box::new(Cursor::new(
            body,
        )))));
        source
    }

    #[test]
    fn corrupt_part_is_skipped_not_fatal() {
        let bogus: &[u8] = &[0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9];
        let good = grey_jpeg();
        let mut source = source_over(&[bogus, good.as_slice(), good.as_slice()]);

        let first = source.next_frame().unwrap().expect("frame after corrupt part");
        assert_eq!(first.sequence, 1);
        assert_eq!((first.width, first.height), (16, 16));
        assert_eq!(source.next_frame().unwrap().map(|f| f.sequence), Some(2));
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_captured, 2);
    }

    #[test]
    fn run_of_corrupt_parts_fails_the_read() {
        let bogus: &[u8] = &[0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9];
        let good = grey_jpeg();

        let mut parts: Vec<&[u8]> = vec![bogus; (MAX_CONSECUTIVE_DECODE_FAILURES - 1) as usize];
        parts.push(good.as_slice());
        assert!(source_over(&parts).next_frame().unwrap().is_some());

        let parts: Vec<&[u8]> = vec![bogus; MAX_CONSECUTIVE_DECODE_FAILURES as usize];
        let mut source = source_over(&parts);
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
    }

    #[test]
    fn snapshot_mode_reuses_first_response_and_paces_requests() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let jpeg = grey_jpeg();
        let server = std::thread::spawn(move || {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().unwrap();
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    jpeg.len()
                );
                stream.write_all(header.as_bytes()).unwrap();
                stream.write_all(&jpeg).unwrap();
            }
        });

        let mut source = MjpegSource::new(MjpegConfig {
            url: format!("http://{}/capture", addr),
            target_fps: 5,
            width: 16,
            height: 16,
            read_timeout: Duration::from_secs(5),
        })
        .unwrap();
        source.open().unwrap();

        // First frame comes from the response that opened the source.
        assert_eq!(source.next_frame().unwrap().map(|f| f.sequence), Some(1));
        let started = Instant::now();
        assert_eq!(source.next_frame().unwrap().map(|f| f.sequence), Some(2));
        assert!(started.elapsed() >= Duration::from_millis(150));

        // Exactly two requests reached the camera.
        server.join().unwrap();
        source.close();
    }

    #[test]
    fn frame_interval_handles_zero_fps() {
        assert_eq!(frame_interval(0), Duration::from_millis(0));
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(health_grace(10), Duration::from_millis(2_000));
    }
}
