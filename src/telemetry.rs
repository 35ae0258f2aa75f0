use crate::models::{LogEntry, LogLevel, StatsSample};
use crate::util::now_ms;
use log::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const LOG_CAPACITY: usize = 1000;
const STATS_CAPACITY: usize = 500;

/// Bounded in-memory rings backing `/api/logs` and `/api/stats`.
/// Entries also go to the normal logger; the store persists snapshots
/// on the stats cadence.
#[derive(Clone)]
pub struct EventLog {
    logs: Arc<Mutex<VecDeque<LogEntry>>>,
    stats: Arc<Mutex<VecDeque<StatsSample>>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            logs: Arc::new(Mutex::new(VecDeque::with_capacity(LOG_CAPACITY))),
            stats: Arc::new(Mutex::new(VecDeque::with_capacity(STATS_CAPACITY))),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        let mut logs = self.logs.lock().unwrap();
        if logs.len() >= LOG_CAPACITY {
            logs.pop_front();
        }
        logs.push_back(LogEntry {
            timestamp_ms: now_ms(),
            level,
            message,
        });
    }

    pub fn recent_logs(&self, limit: usize, min_level: Option<LogLevel>) -> Vec<LogEntry> {
        let logs = self.logs.lock().unwrap();
        logs.iter()
            .rev()
            .filter(|e| min_level.map(|lvl| e.level >= lvl).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn record_stats(&self, sample: StatsSample) {
        let mut stats = self.stats.lock().unwrap();
        if stats.len() >= STATS_CAPACITY {
            stats.pop_front();
        }
        stats.push_back(sample);
    }

    pub fn recent_stats(&self, limit: usize) -> Vec<StatsSample> {
        let stats = self.stats.lock().unwrap();
        stats.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_ring_caps_and_filters() {
        let log = EventLog::new();
        for i in 0..1100 {
            let level = if i % 2 == 0 {
                LogLevel::Info
            } else {
                LogLevel::Warn
            };
            log.log(level, format!("entry {}", i));
        }
        let all = log.recent_logs(2000, None);
        assert_eq!(all.len(), LOG_CAPACITY);
        // newest first
        assert_eq!(all[0].message, "entry 1099");
        let warns = log.recent_logs(10, Some(LogLevel::Warn));
        assert_eq!(warns.len(), 10);
        assert!(warns.iter().all(|e| e.level >= LogLevel::Warn));
    }

    #[test]
    fn test_stats_ring() {
        let log = EventLog::new();
        for i in 0..600 {
            log.record_stats(StatsSample {
                timestamp_ms: i,
                player_count: 0,
                npc_count: 0,
                fleet_count: 0,
                mission_count: 0,
                tick_ms: 1.0,
            });
        }
        let recent = log.recent_stats(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].timestamp_ms, 599);
    }
}
