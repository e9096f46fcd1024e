//! Measurement sinks and the root-side termination tracker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::topology::PeerId;

/// What a measurement describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    /// Global cost of the global response (root)
    GlobalCost,
    /// Scalarized objective of the global response (root)
    GlobalComplexCost,
    /// Population standard deviation of discomfort (root)
    Unfairness,
    /// Mean discomfort (root); per agent, the discomfort of its selected plan
    LocalCost,
    /// Index of the plan an agent ended the iteration with
    SelectedPlan,
    /// Emitted when an agent re-optimized its plan this iteration
    PlanOptimized,
    /// Reorganizations carried out so far
    Reorganizations,
    /// Last iteration (+1) at which the global cost strictly decreased
    Termination,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::GlobalCost => write!(f, "global_cost"),
            Tag::GlobalComplexCost => write!(f, "global_complex_cost"),
            Tag::Unfairness => write!(f, "unfairness"),
            Tag::LocalCost => write!(f, "local_cost"),
            Tag::SelectedPlan => write!(f, "selected_plan"),
            Tag::PlanOptimized => write!(f, "plan_optimized"),
            Tag::Reorganizations => write!(f, "reorganizations"),
            Tag::Termination => write!(f, "termination"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub peer: PeerId,
    pub epoch: usize,
    pub tag: Tag,
    pub value: f64,
}

/// Receives measurements; storage and formatting are up to the sink
pub trait MeasurementSink: Send + Sync {
    fn record(&self, peer: PeerId, epoch: usize, tag: Tag, value: f64);
}

/// In-memory sink with simple queries
#[derive(Debug, Default)]
pub struct MeasurementLog {
    entries: Mutex<Vec<Measurement>>,
}

impl MeasurementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Measurement> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Measurements with the given tag, in recording order
    pub fn with_tag(&self, tag: Tag) -> Vec<Measurement> {
        self.entries()
            .into_iter()
            .filter(|m| m.tag == tag)
            .collect()
    }

    /// Values of `tag` for one peer, in recording order
    pub fn series(&self, peer: PeerId, tag: Tag) -> Vec<(usize, f64)> {
        self.with_tag(tag)
            .into_iter()
            .filter(|m| m.peer == peer)
            .map(|m| (m.epoch, m.value))
            .collect()
    }

    /// Epochs at which `peer` recorded `tag`
    pub fn epochs(&self, peer: PeerId, tag: Tag) -> Vec<usize> {
        self.series(peer, tag).into_iter().map(|(e, _)| e).collect()
    }

    /// Last recorded value of `tag` at `epoch`, from any peer
    pub fn value_at(&self, epoch: usize, tag: Tag) -> Option<f64> {
        self.with_tag(tag)
            .into_iter()
            .filter(|m| m.epoch == epoch)
            .map(|m| m.value)
            .last()
    }
}

impl MeasurementSink for MeasurementLog {
    fn record(&self, peer: PeerId, epoch: usize, tag: Tag, value: f64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Measurement {
                peer,
                epoch,
                tag,
                value,
            });
        }
    }
}

/// Forwards measurements to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MeasurementSink for TracingSink {
    fn record(&self, peer: PeerId, epoch: usize, tag: Tag, value: f64) {
        debug!(%peer, epoch, %tag, value, "measurement");
    }
}

/// Fans every measurement out to several sinks
pub struct Tee {
    sinks: Vec<Arc<dyn MeasurementSink>>,
}

impl Tee {
    pub fn new(sinks: Vec<Arc<dyn MeasurementSink>>) -> Self {
        Self { sinks }
    }
}

impl MeasurementSink for Tee {
    fn record(&self, peer: PeerId, epoch: usize, tag: Tag, value: f64) {
        for sink in &self.sinks {
            sink.record(peer, epoch, tag, value);
        }
    }
}

/// Tracks, at the root, the last iteration whose global cost strictly
/// improved on the last recorded one
#[derive(Debug, Clone, Default)]
pub struct TerminationTracker {
    index: usize,
    best_cost: Option<f64>,
}

impl TerminationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current termination index
    pub fn observe(&mut self, iteration: usize, global_cost: f64, after_reorganization: bool) -> usize {
        match self.best_cost {
            Some(best) if !after_reorganization && iteration > 0 => {
                if global_cost < best {
                    self.index = iteration + 1;
                    self.best_cost = Some(global_cost);
                }
            }
            _ => {
                self.index = iteration + 1;
                self.best_cost = Some(global_cost);
            }
        }
        self.index
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_queries() {
        let log = MeasurementLog::new();
        log.record(PeerId(0), 0, Tag::GlobalCost, 4.0);
        log.record(PeerId(1), 0, Tag::SelectedPlan, 2.0);
        log.record(PeerId(0), 1, Tag::GlobalCost, 3.0);

        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.series(PeerId(0), Tag::GlobalCost), vec![(0, 4.0), (1, 3.0)]);
        assert_eq!(log.epochs(PeerId(1), Tag::SelectedPlan), vec![0]);
        assert_eq!(log.value_at(1, Tag::GlobalCost), Some(3.0));
        assert_eq!(log.value_at(2, Tag::GlobalCost), None);
    }

    #[test]
    fn test_tee_reaches_every_sink() {
        let a = Arc::new(MeasurementLog::new());
        let b = Arc::new(MeasurementLog::new());
        let tee = Tee::new(vec![a.clone(), b.clone(), Arc::new(TracingSink)]);
        tee.record(PeerId(3), 2, Tag::Unfairness, 0.5);
        assert_eq!(a.entries(), b.entries());
        assert_eq!(a.series(PeerId(3), Tag::Unfairness), vec![(2, 0.5)]);
    }

    #[test]
    fn test_termination_tracks_last_strict_improvement() {
        let mut tracker = TerminationTracker::new();
        assert_eq!(tracker.observe(0, 10.0, false), 1);
        assert_eq!(tracker.observe(1, 8.0, false), 2);
        // equal cost is not an improvement
        assert_eq!(tracker.observe(2, 8.0, false), 2);
        assert_eq!(tracker.observe(3, 9.0, false), 2);
        // a reorganization restarts the reference cost
        assert_eq!(tracker.observe(4, 9.5, true), 5);
        assert_eq!(tracker.observe(5, 9.0, false), 6);
        assert_eq!(tracker.index(), 6);
    }
}
