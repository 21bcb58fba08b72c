//! Application and per-operation state.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use dhs_services::automl::{BoundingBox, Detection};

/// Placeholders until pin base and fiber width are measured.
const PIN_BASE_X: f64 = 0.111;
const FIBER_WIDTH: f64 = 0.222;
const MICRO_MOUNT_CLASS: &str = "mitegen";

fn round5(v: f64) -> f64 {
    (v * 1e5).round() / 1e5
}

/// Loop geometry derived from one AutoML detection, reported to DCSS as a
/// `LOOP_INFO` update.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopInfo {
    /// Number of images received when the result arrived; 1-based.
    pub index: usize,
    pub bbox: BoundingBox,
    pub tip_x: f64,
    pub tip_y: f64,
    pub pin_base_x: f64,
    pub fiber_width: f64,
    pub loop_width: f64,
    pub box_min_x: f64,
    pub box_max_x: f64,
    pub box_min_y: f64,
    pub box_max_y: f64,
    pub loop_width_x: f64,
    pub is_micro_mount: bool,
}

impl LoopInfo {
    pub fn from_detection(index: usize, detection: &Detection<'_>) -> Self {
        let bb = detection.bbox;
        Self {
            index,
            bbox: bb,
            tip_x: round5(bb[2]),
            tip_y: round5((bb[3] - bb[1]) / 2.0),
            pin_base_x: round5(PIN_BASE_X),
            fiber_width: FIBER_WIDTH,
            loop_width: round5(bb[3] - bb[1]),
            box_min_x: round5(bb[0]),
            box_max_x: round5(bb[2]),
            box_min_y: round5(bb[3]),
            box_max_y: round5(bb[1]),
            loop_width_x: round5(bb[2] - bb[0]),
            is_micro_mount: detection.class == MICRO_MOUNT_CLASS,
        }
    }

    /// `index minY maxY height` of the loop, answered to `reboxLoopImage`.
    pub fn rebox(&self) -> String {
        let (min_y, max_y) = (round5(self.bbox[1]), round5(self.bbox[3]));
        format!("{} {min_y} {max_y} {}", self.index, round5(max_y - min_y))
    }
}

impl fmt::Display for LoopInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LOOP_INFO {} normal {} {} {} {} {} {} {} {} {} {} {}",
            self.index,
            self.tip_x,
            self.tip_y,
            self.pin_base_x,
            self.fiber_width,
            self.loop_width,
            self.box_min_x,
            self.box_max_x,
            self.box_min_y,
            self.box_max_y,
            self.loop_width_x,
            u8::from(self.is_micro_mount),
        )
    }
}

/// Images and results of the most recent `collectLoopImages`.
#[derive(Debug, Default)]
pub struct LoopImageSet {
    images: Vec<Bytes>,
    results: Vec<LoopInfo>,
}

impl LoopImageSet {
    pub fn add_image(&mut self, image: Bytes) {
        self.images.push(image);
    }

    pub fn add_result(&mut self, info: LoopInfo) {
        self.results.push(info);
    }

    pub fn number_of_images(&self) -> usize {
        self.images.len()
    }

    pub fn results(&self) -> &[LoopInfo] {
        &self.results
    }

    /// The result reported for image `index`, most recent first.
    pub fn result(&self, index: usize) -> Option<&LoopInfo> {
        self.results.iter().rev().find(|r| r.index == index)
    }
}

/// Shared state of the loop DHS.
#[derive(Debug)]
pub struct LoopState {
    stopped: AtomicBool,
    images: Mutex<LoopImageSet>,
    test_image: PathBuf,
}

impl LoopState {
    pub fn new(test_image: impl Into<PathBuf>) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            images: Mutex::new(LoopImageSet::default()),
            test_image: test_image.into(),
        }
    }

    /// Set by `stopCollectLoopImages`; images arriving afterwards are not analysed.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.stopped.store(stopped, Ordering::SeqCst);
    }

    pub fn images(&self) -> MutexGuard<'_, LoopImageSet> {
        self.images.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn reset_images(&self) {
        *self.images() = LoopImageSet::default();
    }

    pub fn test_image(&self) -> &PathBuf {
        &self.test_image
    }
}

/// What an active operation is waiting for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoopOperationState {
    #[default]
    Started,
    /// A single prediction was requested under `key`.
    Predicting { key: String },
    /// Streaming images from the receiver; `images` counts those stored.
    Collecting { images: usize },
}
