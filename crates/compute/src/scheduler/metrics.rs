use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::command::ChangeKind;
use super::types::SchedulerState;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    /// Commands executed, by change kind.
    pub commands_executed: HashMap<ChangeKind, u64>,
    /// Rolling average execution time, by change kind.
    pub avg_duration: HashMap<ChangeKind, Duration>,
    /// When the last command finished.
    pub last_run: Option<DateTime<Utc>>,
    /// Commands that ended with an error (cancellation excluded).
    pub failures: u64,
    /// Project and global aborts.
    pub aborts: u64,
    /// Project roll-ups performed.
    pub rollups: u64,
    /// Commands waiting in the queue.
    pub queue_depth: usize,
    pub state: SchedulerState,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self {
            commands_executed: HashMap::new(),
            avg_duration: HashMap::new(),
            last_run: None,
            failures: 0,
            aborts: 0,
            rollups: 0,
            queue_depth: 0,
            state: SchedulerState::Idle,
        }
    }
}

impl SchedulerMetrics {
    /// Record a command execution.
    pub fn record_execution(&mut self, kind: ChangeKind, duration: Duration) {
        let count = {
            let count = self.commands_executed.entry(kind).or_default();
            *count += 1;
            *count
        };
        self.last_run = Some(Utc::now());

        let prev_avg = self.avg_duration.get(&kind).copied().unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_duration.insert(kind, new_avg);
    }

    pub fn total_executed(&self) -> u64 {
        self.commands_executed.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(ChangeKind::Added, Duration::from_millis(100));

        assert_eq!(m.commands_executed[&ChangeKind::Added], 1);
        assert!(m.last_run.is_some());
        assert_eq!(m.avg_duration[&ChangeKind::Added], Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(ChangeKind::Changed, Duration::from_millis(100));
        m.record_execution(ChangeKind::Changed, Duration::from_millis(200));
        m.record_execution(ChangeKind::Removed, Duration::from_millis(5));

        assert_eq!(m.commands_executed[&ChangeKind::Changed], 2);
        assert_eq!(m.total_executed(), 3);
        let avg = m.avg_duration[&ChangeKind::Changed].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.state, SchedulerState::Idle);
        assert_eq!(m.queue_depth, 0);
        assert!(m.commands_executed.is_empty());
    }
}
