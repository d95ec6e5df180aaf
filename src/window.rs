//! Detection windows.
//!
//! Per-frame detections are noisy: a garment is missed when it is partially
//! occluded, and the model occasionally hallucinates a neighbouring class. A
//! `DetectionWindow` sums per-garment hits over a fixed duration and confirms
//! only garments whose absolute hit count exceeds a threshold. Every frame in the
//! window weighs the same; there is no decay.
//!
//! The window holds no memory across cycles. Wash counts live in the remote
//! catalog; the window is zeroed in place after every close.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

pub const DEFAULT_WINDOW_SECS: u64 = 5;
pub const DEFAULT_COUNT_THRESHOLD: u32 = 10;

/// Where a garment is worn. Used only to report the leading garment per kind.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum GarmentKind {
    Top,
    Bottom,
    #[default]
    Other,
}

impl FromStr for GarmentKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "bottom" => Ok(Self::Bottom),
            "other" | "" => Ok(Self::Other),
            other => Err(anyhow!("unknown garment kind '{}'", other)),
        }
    }
}

impl fmt::Display for GarmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A tracked garment: detector class name plus kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Garment {
    pub name: String,
    #[serde(default)]
    pub kind: GarmentKind,
}

impl Garment {
    pub fn new(name: impl Into<String>, kind: GarmentKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The garments a window tracks. Names must match the detector's class names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    garments: BTreeMap<String, GarmentKind>,
}

impl Vocabulary {
    pub fn new(garments: impl IntoIterator<Item = Garment>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for garment in garments {
            let name = garment.name.trim().to_string();
            if name.is_empty() {
                return Err(anyhow!("garment names must not be empty"));
            }
            if map.insert(name.clone(), garment.kind).is_some() {
                return Err(anyhow!("garment '{}' listed twice", name));
            }
        }
        if map.is_empty() {
            return Err(anyhow!("vocabulary must track at least one garment"));
        }
        Ok(Self { garments: map })
    }

    /// Vocabulary of untyped names, mostly for tests.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| Garment::new(name, GarmentKind::Other)),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.garments.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<GarmentKind> {
        self.garments.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.garments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.garments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.garments.is_empty()
    }
}

impl Default for Vocabulary {
    /// The wardrobe the station was first trained on.
    fn default() -> Self {
        let tops = [
            "Blue Hoodie",
            "HOSA Hoodie",
            "Waterloo Hoodie",
            "Yellow Hoodie",
            "Yellow T-Shirt",
            "Maroon T-Shirt",
        ];
        let bottoms = [
            "Blue Sweatpants",
            "Gray Sweatpants",
            "White Sweatpants",
            "Navy Sweatpants",
        ];
        let garments = tops
            .iter()
            .map(|name| (name, GarmentKind::Top))
            .chain(bottoms.iter().map(|name| (name, GarmentKind::Bottom)))
            .map(|(name, kind)| (name.to_string(), kind))
            .collect();
        Self { garments }
    }
}

/// Fixed-duration hit counter over a vocabulary.
///
/// `counts` always has exactly one key per vocabulary garment.
#[derive(Clone, Debug)]
pub struct DetectionWindow {
    vocabulary: Vocabulary,
    counts: BTreeMap<String, u32>,
    start: Instant,
    duration: Duration,
    count_threshold: u32,
}

impl DetectionWindow {
    pub fn new(
        vocabulary: Vocabulary,
        duration: Duration,
        count_threshold: u32,
        now: Instant,
    ) -> Self {
        let counts = vocabulary.names().map(|name| (name.to_string(), 0)).collect();
        Self {
            vocabulary,
            counts,
            start: now,
            duration,
            count_threshold,
        }
    }

    /// Count one hit per label occurrence. Labels outside the vocabulary are dropped.
    pub fn record<S: AsRef<str>>(&mut self, labels: &[S]) {
        for label in labels {
            let label = label.as_ref();
            match self.counts.get_mut(label) {
                Some(count) => *count = count.saturating_add(1),
                None => log::debug!("ignoring detection outside vocabulary: {}", label),
            }
        }
    }

    /// True once `duration` has passed since the window opened.
    pub fn elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start) >= self.duration
    }

    /// Garments whose count is strictly above the threshold, regardless of time.
    pub fn confirmed(&self) -> BTreeSet<String> {
        self.counts
            .iter()
            .filter(|(_, count)| **count > self.count_threshold)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Close the window and derive the confirmed set.
    ///
    /// Closing before the window has elapsed is a no-op and yields `None`; the
    /// counts are left untouched so the window can keep accumulating.
    pub fn close(&self, now: Instant) -> Option<BTreeSet<String>> {
        if !self.elapsed(now) {
            return None;
        }
        Some(self.confirmed())
    }

    /// Zero all counts and reopen at `now`.
    pub fn reset(&mut self, now: Instant) {
        for count in self.counts.values_mut() {
            *count = 0;
        }
        self.start = now;
    }

    /// Highest-count garment per kind, ignoring kinds with no hits. Ties go to the
    /// alphabetically first garment.
    pub fn leaders(&self) -> BTreeMap<GarmentKind, (String, u32)> {
        let mut leaders: BTreeMap<GarmentKind, (String, u32)> = BTreeMap::new();
        for (name, &count) in &self.counts {
            if count == 0 {
                continue;
            }
            let kind = self.vocabulary.kind_of(name).unwrap_or_default();
            let replace = leaders
                .get(&kind)
                .map(|(_, best)| count > *best)
                .unwrap_or(true);
            if replace {
                leaders.insert(kind, (name.clone(), count));
            }
        }
        leaders
    }

    pub fn count(&self, name: &str) -> Option<u32> {
        self.counts.get(name).copied()
    }

    pub fn counts(&self) -> &BTreeMap<String, u32> {
        &self.counts
    }

    pub fn total_hits(&self) -> u64 {
        self.counts.values().map(|&count| count as u64).sum()
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn count_threshold(&self) -> u32 {
        self.count_threshold
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }
}
