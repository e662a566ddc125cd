// src/logger.rs

use crate::config::Config;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing::Level;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;

const DEFAULT_JOURNAL_CAPACITY: usize = 1000;

/// Classification tag attached to every journal entry, used for
/// filtering when reading recent events back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    PositionPolling,
    CalculatedHedge,
    Leverage,
    OpenShortPosition,
    CloseShortPosition,
    AdjustShortPosition,
    TradeExecuted,
    Strategy,
    Risk,
    Database,
    Exchange,
    Rpc,
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogTag::PositionPolling => "POSITION_POLLING",
            LogTag::CalculatedHedge => "CALCULATED_HEDGE",
            LogTag::Leverage => "LEVERAGE",
            LogTag::OpenShortPosition => "OPEN_SHORT_POSITION",
            LogTag::CloseShortPosition => "CLOSE_SHORT_POSITION",
            LogTag::AdjustShortPosition => "ADJUST_SHORT_POSITION",
            LogTag::TradeExecuted => "TRADE_EXECUTED",
            LogTag::Strategy => "STRATEGY",
            LogTag::Risk => "RISK",
            LogTag::Database => "DATABASE",
            LogTag::Exchange => "EXCHANGE",
            LogTag::Rpc => "RPC",
            LogTag::Error => "ERROR",
            LogTag::Warning => "WARNING",
            LogTag::Info => "INFO",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub tag: LogTag,
    pub level: Level,
    pub message: String,
}

/// Bounded in-memory journal of tagged events, with an optional file
/// sink. One instance exists per process, installed by `init`.
pub struct LogJournal {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    file: Option<Mutex<File>>,
}

static JOURNAL: OnceLock<LogJournal> = OnceLock::new();

impl LogJournal {
    fn new(capacity: usize, log_file: Option<&str>) -> Result<Self> {
        let file = match log_file {
            Some(path) if !path.is_empty() => {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .with_context(|| format!("Failed to create log directory for {}", path))?;
                    }
                }
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file {}", path))?;
                Some(Mutex::new(f))
            }
            _ => None,
        };
        Ok(Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            file,
        })
    }

    pub fn record(&self, tag: LogTag, level: Level, message: String) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            tag,
            level,
            message,
        };

        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(
                    f,
                    "{} [{}] {} {}",
                    entry.timestamp.to_rfc3339(),
                    entry.tag,
                    entry.level,
                    entry.message
                );
            }
        }

        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Most recent `count` entries, newest last, optionally filtered by tag.
    pub fn recent(&self, count: usize, tag: Option<LogTag>) -> Vec<LogEntry> {
        let entries = match self.entries.lock() {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut result: Vec<LogEntry> = entries
            .iter()
            .filter(|e| tag.map_or(true, |t| e.tag == t))
            .rev()
            .take(count)
            .cloned()
            .collect();
        result.reverse();
        result
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Install the tracing subscriber and the process-wide journal.
/// Safe to call more than once; later calls keep the first journal.
pub fn init(cfg: &Config) -> Result<&'static LogJournal> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.to_lowercase()));

    let _ = fmt().with_env_filter(filter).with_target(false).try_init();

    if JOURNAL.get().is_none() {
        let journal = LogJournal::new(DEFAULT_JOURNAL_CAPACITY, cfg.log_file.as_deref())?;
        let _ = JOURNAL.set(journal);
    }
    JOURNAL
        .get()
        .context("Log journal was not installed")
}

pub fn journal() -> Option<&'static LogJournal> {
    JOURNAL.get()
}

/// Record a tagged event in the journal (when installed) and emit it
/// through tracing at the matching level.
pub fn log(tag: LogTag, level: Level, message: String) {
    match level {
        Level::ERROR => tracing::error!("[{}] {}", tag, message),
        Level::WARN => tracing::warn!("[{}] {}", tag, message),
        Level::DEBUG => tracing::debug!("[{}] {}", tag, message),
        Level::TRACE => tracing::trace!("[{}] {}", tag, message),
        _ => tracing::info!("[{}] {}", tag, message),
    }
    if let Some(j) = journal() {
        j.record(tag, level, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_ring_is_bounded() {
        let journal = LogJournal::new(3, None).unwrap();
        for i in 0..5 {
            journal.record(LogTag::Info, Level::INFO, format!("entry {}", i));
        }
        let recent = journal.recent(10, None);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "entry 2");
        assert_eq!(recent[2].message, "entry 4");
    }

    #[test]
    fn recent_filters_by_tag() {
        let journal = LogJournal::new(10, None).unwrap();
        journal.record(LogTag::Risk, Level::WARN, "rate limit".into());
        journal.record(LogTag::Rpc, Level::INFO, "reserves".into());
        journal.record(LogTag::Risk, Level::INFO, "ok".into());

        let risk = journal.recent(10, Some(LogTag::Risk));
        assert_eq!(risk.len(), 2);
        assert!(risk.iter().all(|e| e.tag == LogTag::Risk));
    }
}
