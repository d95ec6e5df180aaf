//! Wear Tracker
//!
//! This crate implements a clothing-detection station: it watches a camera
//! stream, decides which garments a person is wearing, and keeps a remote
//! laundry backend's wash counters up to date.
//!
//! # Architecture
//!
//! One detection session runs per trigger:
//!
//! 1. **Ingest**: frames are read from an MJPEG stream (or a replay source).
//! 2. **Detect**: a pretrained model labels garments per frame; confidence and
//!    overlap thresholds are enforced whatever the backend.
//! 3. **Window**: per-garment hits are summed over a fixed window; garments whose
//!    count is strictly above the threshold are confirmed.
//! 4. **Reconcile**: each confirmed garment's wash counter is bumped on the backend
//!    and the worn set is logged for the day.
//!
//! Any failure before a window closes ends the session with nothing confirmed.
//! Backend failures after that are logged and isolated per garment.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames, resizing and JPEG encoding
//! - `ingest`: frame sources (HTTP MJPEG, replay)
//! - `detect`: detector backends and threshold enforcement
//! - `window`: vocabulary and the hit-counting window
//! - `catalog`: the laundry backend client and its failure policy
//! - `session`: the per-run state machine
//! - `overlay`: optional annotated-frame output
//! - `station`: long-lived detector + catalog owner
//! - `api`: the trigger server
//! - `config`: file and environment configuration

pub mod api;
pub mod catalog;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod session;
pub mod station;
pub mod window;

pub use catalog::{
    CatalogApi, ClothingCatalogEntry, DryRunCatalog, HttpCatalogApi, HttpCatalogConfig,
    ReconcileReport, RemoteCatalog, WearCache,
};
pub use config::{BackendKind, StationConfig};
pub use detect::{build_detector, Detection, DetectionResult, DetectionThresholds, Detector};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, MjpegSource, ReplaySource};
pub use overlay::{OverlayControl, OverlaySink, QuitSignal, SnapshotOverlay};
pub use session::{
    Clock, DetectionSession, SessionOutcome, SessionSettings, SessionState, StopReason,
    SystemClock,
};
pub use station::Station;
pub use window::{DetectionWindow, Garment, GarmentKind, Vocabulary};
