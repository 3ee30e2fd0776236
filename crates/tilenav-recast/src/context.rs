//! Build context used to time the stages of a tile build

use std::collections::HashMap;
use std::time::Duration;

use web_time::Instant;

/// Stages of the tile build pipeline that are timed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildStage {
    Rasterize,
    Filter,
    MarkAreas,
    Compact,
    Erode,
    Regions,
    Contours,
    PolyMesh,
    DetailMesh,
    Assemble,
}

impl BuildStage {
    pub fn name(&self) -> &'static str {
        match self {
            BuildStage::Rasterize => "rasterize",
            BuildStage::Filter => "filter",
            BuildStage::MarkAreas => "mark-areas",
            BuildStage::Compact => "compact",
            BuildStage::Erode => "erode",
            BuildStage::Regions => "regions",
            BuildStage::Contours => "contours",
            BuildStage::PolyMesh => "polymesh",
            BuildStage::DetailMesh => "detail-mesh",
            BuildStage::Assemble => "assemble",
        }
    }
}

/// Collects per-stage timings for a single build
#[derive(Debug, Default)]
pub struct BuildContext {
    timing_enabled: bool,
    started: HashMap<BuildStage, Instant>,
    timings: HashMap<BuildStage, Duration>,
}

impl BuildContext {
    /// Creates a new context with timing enabled
    pub fn new() -> Self {
        Self {
            timing_enabled: true,
            ..Default::default()
        }
    }

    /// Creates a context that ignores timer calls
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn start_timer(&mut self, stage: BuildStage) {
        if self.timing_enabled {
            self.started.insert(stage, Instant::now());
        }
    }

    /// Stops the stage timer, accumulating into the stage total
    pub fn stop_timer(&mut self, stage: BuildStage) {
        if let Some(start) = self.started.remove(&stage) {
            *self.timings.entry(stage).or_default() += start.elapsed();
        }
    }

    /// Accumulated time for a stage
    pub fn timing(&self, stage: BuildStage) -> Duration {
        self.timings.get(&stage).copied().unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.timings.values().sum()
    }

    /// Stage timings ordered by pipeline position
    pub fn timings(&self) -> Vec<(BuildStage, Duration)> {
        let mut timings: Vec<_> = self.timings.iter().map(|(s, d)| (*s, *d)).collect();
        timings.sort_by_key(|(s, _)| *s);
        timings
    }

    /// Logs the stage timings at debug level
    pub fn log_timings(&self, label: &str) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        for (stage, duration) in self.timings() {
            log::debug!(
                "{label}: {:<12} {:>8.3} ms",
                stage.name(),
                duration.as_secs_f64() * 1000.0
            );
        }
        log::debug!(
            "{label}: total        {:>8.3} ms",
            self.total().as_secs_f64() * 1000.0
        );
    }
}
