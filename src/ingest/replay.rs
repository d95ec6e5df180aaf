//! Local replay frame source.
//!
//! This module provides `ReplaySource` for feeding a session from disk instead of
//! a live camera:
//! - A directory of `.jpg`/`.jpeg` files, replayed once in file-name order
//! - `stub://<name>`: endless synthetic frames for dry runs
//!
//! The replay source never touches the network. A directory replay ends with
//! `Ok(None)` after the last file, the same way a live stream reports end of stream.

use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a replay source.
#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// Local directory path, or `stub://<name>` for synthetic frames.
    pub path: String,
    /// Working resolution frames are resized to.
    pub width: u32,
    pub height: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            path: "stub://closet".to_string(),
            width: 640,
            height: 360,
        }
    }
}

pub struct ReplaySource {
    config: ReplayConfig,
    mode: ReplayMode,
    frame_count: u64,
    scene_state: u8,
    opened: bool,
}

enum ReplayMode {
    Synthetic,
    Directory(VecDeque<PathBuf>),
}

impl ReplaySource {
    pub fn new(config: ReplayConfig) -> Result<Self> {
        if !is_local_source_path(&config.path) {
            return Err(anyhow!(
                "replay only supports local paths or stub:// (got '{}')",
                config.path
            ));
        }
        let mode = if config.path.starts_with("stub://") {
            ReplayMode::Synthetic
        } else {
            ReplayMode::Directory(VecDeque::new())
        };
        Ok(Self {
            config,
            mode,
            frame_count: 0,
            scene_state: 0,
            opened: false,
        })
    }

    fn synthetic_frame(&mut self) -> Frame {
        let width = self.config.width;
        let height = self.config.height;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixel_count = (width as usize) * (height as usize) * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        Frame::new(pixels, width, height, self.frame_count)
    }
}

impl FrameSource for ReplaySource {
    fn describe(&self) -> String {
        format!("replay:{}", self.config.path)
    }

    fn open(&mut self) -> Result<()> {
        if let ReplayMode::Directory(pending) = &mut self.mode {
            *pending = list_jpeg_files(Path::new(&self.config.path))?.into();
            log::info!(
                "replay source opened {} ({} frames)",
                self.config.path,
                pending.len()
            );
        } else {
            log::info!("replay source opened {} (synthetic)", self.config.path);
        }
        self.opened = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.opened {
            return Err(anyhow!("replay source not opened; call open() first"));
        }
        let path = match &mut self.mode {
            ReplayMode::Synthetic => {
                self.frame_count += 1;
                return Ok(Some(self.synthetic_frame()));
            }
            ReplayMode::Directory(pending) => match pending.pop_front() {
                Some(path) => path,
                None => return Ok(None),
            },
        };
        let bytes =
            std::fs::read(&path).with_context(|| format!("read frame {}", path.display()))?;
        self.frame_count += 1;
        let frame = Frame::decode(&bytes, self.frame_count)
            .with_context(|| format!("decode frame {}", path.display()))?;
        frame
            .resized(self.config.width, self.config.height)
            .map(Some)
    }

    fn is_healthy(&self) -> bool {
        self.opened
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.path.clone(),
        }
    }

    fn close(&mut self) {
        self.opened = false;
        if let ReplayMode::Directory(pending) = &mut self.mode {
            pending.clear();
        }
    }
}

fn list_jpeg_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("open replay dir {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_jpeg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);
        if path.is_file() && is_jpeg {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_local_source_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
