//! One detection run, from opening the stream to reconciling with the catalog.
//!
//! ```text
//! Idle --open ok--> Running --window elapsed--> WindowClosing --> Stopped(WindowClosed)
//!   |                  |
//!   | open failed      | end of stream / read failed / empty frame / overlay quit
//!   v                  v
//! Stopped(SourceUnavailable)   Stopped(..)
//! ```
//!
//! A session closes at most one window. Abnormal stops confirm nothing and make
//! no catalog writes. The source is closed exactly once, on entering `Stopped`.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use crate::catalog::{ReconcileReport, RemoteCatalog, WearCache};
use crate::config::WindowSettings;
use crate::detect::{DetectionResult, Detector};
use crate::ingest::FrameSource;
use crate::overlay::{OverlayControl, OverlaySink};
use crate::window::{DetectionWindow, Vocabulary};

/// Time source for window timing and the worn-items log date.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn today(&self) -> NaiveDate;
}

/// Wall clock: monotonic instants, local calendar date.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Per-session tuning, taken from `StationConfig`.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub vocabulary: Vocabulary,
    pub window: WindowSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            window: WindowSettings::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    SourceUnavailable,
    EndOfStream,
    ReadFailed,
    EmptyFrame,
    Quit,
    WindowClosed,
}

impl StopReason {
    /// Only a closed window yields a result.
    pub fn is_normal(self) -> bool {
        self == Self::WindowClosed
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceUnavailable => "source unavailable",
            Self::EndOfStream => "end of stream",
            Self::ReadFailed => "read failed",
            Self::EmptyFrame => "empty frame",
            Self::Quit => "quit",
            Self::WindowClosed => "window closed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    WindowClosing,
    Stopped(StopReason),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub confirmed: BTreeSet<String>,
    pub stop_reason: StopReason,
    /// Frames read from the source, whether or not detection succeeded on them.
    pub frames: u64,
    pub report: ReconcileReport,
}

impl SessionOutcome {
    /// Outcome for a session whose source could not even be built.
    pub fn unavailable() -> Self {
        Self {
            confirmed: BTreeSet::new(),
            stop_reason: StopReason::SourceUnavailable,
            frames: 0,
            report: ReconcileReport::default(),
        }
    }

    pub fn confirmed_items(&self) -> Vec<String> {
        self.confirmed.iter().cloned().collect()
    }
}

pub struct DetectionSession<'a> {
    state: SessionState,
    source: Box<dyn FrameSource>,
    source_closed: bool,
    detector: &'a mut Detector,
    catalog: RemoteCatalog,
    clock: &'a dyn Clock,
    overlay: Option<&'a mut dyn OverlaySink>,
    window: DetectionWindow,
    cache: WearCache,
    frames: u64,
    confirmed: BTreeSet<String>,
    report: ReconcileReport,
}

impl<'a> DetectionSession<'a> {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: &'a mut Detector,
        catalog: RemoteCatalog,
        clock: &'a dyn Clock,
        settings: &SessionSettings,
    ) -> Self {
        let window = DetectionWindow::new(
            settings.vocabulary.clone(),
            settings.window.duration,
            settings.window.count_threshold,
            clock.now(),
        );
        Self {
            state: SessionState::Idle,
            source,
            source_closed: false,
            detector,
            catalog,
            clock,
            overlay: None,
            window,
            cache: WearCache::default(),
            frames: 0,
            confirmed: BTreeSet::new(),
            report: ReconcileReport::default(),
        }
    }

    pub fn with_overlay(mut self, overlay: &'a mut dyn OverlaySink) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn window(&self) -> &DetectionWindow {
        &self.window
    }

    /// Advance by one transition. Stepping a stopped session does nothing.
    pub fn step(&mut self) -> SessionState {
        let next = match self.state {
            SessionState::Idle => self.start(),
            SessionState::Running => self.process_frame(),
            SessionState::WindowClosing => self.close_window(),
            stopped @ SessionState::Stopped(_) => return stopped,
        };
        if let SessionState::Stopped(reason) = next {
            self.finish(reason);
        }
        self.state = next;
        next
    }

    /// Step until stopped and return the outcome.
    pub fn run(mut self) -> SessionOutcome {
        loop {
            if let SessionState::Stopped(reason) = self.step() {
                return SessionOutcome {
                    confirmed: std::mem::take(&mut self.confirmed),
                    stop_reason: reason,
                    frames: self.frames,
                    report: std::mem::take(&mut self.report),
                };
            }
        }
    }

    fn start(&mut self) -> SessionState {
        let description = self.source.describe();
        if let Err(err) = self.source.open() {
            log::warn!("cannot open {}: {:#}", description, err);
            return SessionState::Stopped(StopReason::SourceUnavailable);
        }
        log::info!(
            "session started on {} with {} backend",
            description,
            self.detector.backend_name()
        );
        self.cache = self.catalog.fetch_cache();
        self.window.reset(self.clock.now());
        SessionState::Running
    }

    fn process_frame(&mut self) -> SessionState {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return SessionState::Stopped(StopReason::EndOfStream),
            Err(err) => {
                log::warn!("frame read failed: {:#}", err);
                return SessionState::Stopped(StopReason::ReadFailed);
            }
        };
        if frame.is_empty() {
            log::warn!("frame {} carried no pixel data", frame.sequence);
            return SessionState::Stopped(StopReason::EmptyFrame);
        }
        self.frames += 1;

        let result = match self.detector.detect_full(&frame) {
            Ok(result) => result,
            Err(err) => {
                log::warn!("detection failed on frame {}: {:#}", frame.sequence, err);
                DetectionResult::default()
            }
        };
        let labels = result.labels();
        if !labels.is_empty() {
            log::debug!(
                "frame {} ({} ms old): {:?}",
                frame.sequence,
                frame.age().as_millis(),
                labels
            );
        }
        self.window.record(&labels);

        if let Some(overlay) = self.overlay.as_mut() {
            match overlay.render(&frame, &result) {
                Ok(OverlayControl::Quit) => return SessionState::Stopped(StopReason::Quit),
                Ok(OverlayControl::Continue) => {}
                Err(err) => log::warn!("overlay render failed: {:#}", err),
            }
        }

        if self.window.elapsed(self.clock.now()) {
            SessionState::WindowClosing
        } else {
            SessionState::Running
        }
    }

    fn close_window(&mut self) -> SessionState {
        let now = self.clock.now();
        let confirmed = self.window.close(now).unwrap_or_default();
        for (kind, (name, count)) in self.window.leaders() {
            log::info!("leading {}: {} ({} hits)", kind, name, count);
        }
        log::info!(
            "window closed after {} frames: confirmed {:?}",
            self.frames,
            confirmed
        );
        if !confirmed.is_empty() {
            self.report = self
                .catalog
                .reconcile(&mut self.cache, &confirmed, self.clock.today());
            if !self.report.is_clean() {
                log::warn!(
                    "reconcile incomplete: failed pushes {:?}, logged {}",
                    self.report.failed_pushes,
                    self.report.logged
                );
            }
        }
        self.window.reset(now);
        self.confirmed = confirmed;
        SessionState::Stopped(StopReason::WindowClosed)
    }

    fn finish(&mut self, reason: StopReason) {
        if !self.source_closed {
            let stats = self.source.stats();
            log::info!(
                "{}: {} frames captured, healthy: {}",
                stats.source,
                stats.frames_captured,
                self.source.is_healthy()
            );
            self.source.close();
            self.source_closed = true;
        }
        if reason.is_normal() {
            log::info!("session stopped: {}", reason);
        } else {
            log::warn!("session stopped early: {} after {} frames", reason, self.frames);
        }
    }
}
