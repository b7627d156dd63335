//! Inference log watchers
//!
//! Both watchers are cooperative polling loops over growing files. They are
//! started per inference attempt and stopped explicitly by the owning task
//! through `WatcherHandle::stop`, which also performs a final read.

use crate::config::WatcherConfig;
use crate::job::JobId;
use crate::registry::{KillReason, ProcessRegistry};
use regex::Regex;
use serde::Serialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reads lines appended to a file since the previous call
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    /// Bytes of an unfinished line, decoded once its newline arrives
    partial: Vec<u8>,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    /// Tail only what is written after now
    pub async fn from_end(path: impl Into<PathBuf>) -> Self {
        let mut tail = Self::new(path);
        if let Ok(meta) = tokio::fs::metadata(&tail.path).await {
            tail.offset = meta.len();
        }
        tail
    }

    /// Complete lines appended since the last read. A missing file reads as empty.
    pub async fn read_new_lines(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let len = file.metadata().await?.len();
        if len < self.offset {
            // truncated or replaced
            self.offset = 0;
            self.partial.clear();
        }
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;

        self.partial.extend_from_slice(&buf);
        let mut lines: Vec<String> = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            lines.push(
                String::from_utf8_lossy(&line)
                    .trim_end_matches(['\n', '\r'])
                    .to_string(),
            );
        }
        Ok(lines)
    }
}

/// Parsed event from the inference screen log
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// Sample position reported at the start of a log row
    Position(u64),
    /// Speed, normalized to hours per million states
    Rate(f64),
    /// Fatal runtime error text; the attempt failed whatever its exit code
    FatalSignature(String),
}

/// Turns screen-log lines into `LogEvent`s
#[derive(Debug, Clone)]
pub struct LogLineParser {
    fatal_signature: String,
    rate: Regex,
    position: Regex,
}

impl LogLineParser {
    pub fn new(fatal_signature: impl Into<String>) -> Self {
        Self {
            fatal_signature: fatal_signature.into(),
            rate: Regex::new(
                r"(?i)([0-9]*\.?[0-9]+(?:e[-+]?[0-9]+)?)\s*(hours|minutes|seconds)/million\s+states",
            )
            .unwrap(),
            position: Regex::new(r"^\s*([0-9]+)(?:\s|$)").unwrap(),
        }
    }

    pub fn parse(&self, line: &str) -> Vec<LogEvent> {
        let mut events = Vec::new();
        if line.contains(&self.fatal_signature) {
            events.push(LogEvent::FatalSignature(line.trim().to_string()));
            return events;
        }
        // rate first, so a row's position is estimated with that row's rate
        if let Some(caps) = self.rate.captures(line) {
            if let Ok(value) = caps[1].parse::<f64>() {
                let hours = match caps[2].to_ascii_lowercase().as_str() {
                    "minutes" => value / 60.0,
                    "seconds" => value / 3600.0,
                    _ => value,
                };
                events.push(LogEvent::Rate(hours));
            }
        }
        if let Some(pos) = self
            .position
            .captures(line)
            .and_then(|c| c[1].parse::<u64>().ok())
        {
            events.push(LogEvent::Position(pos));
        }
        events
    }
}

/// Progress estimate sent to the submitter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    /// Milestone fraction that triggered this report
    pub milestone: f64,
    pub position: u64,
    pub chain_length: u64,
    pub remaining_secs: u64,
}

/// Fires each configured milestone once, in order
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    milestones: Vec<f64>,
    next: usize,
    chain_length: u64,
    position: u64,
    hours_per_million: Option<f64>,
}

impl ProgressTracker {
    pub fn new(milestones: &[f64], chain_length: u64) -> Self {
        Self {
            milestones: milestones.iter().copied().take(2).collect(),
            next: 0,
            chain_length: chain_length.max(1),
            position: 0,
            hours_per_million: None,
        }
    }

    pub fn fraction(&self) -> f64 {
        self.position as f64 / self.chain_length as f64
    }

    /// Remaining time at the most recently observed rate, saturating at `Duration::MAX`
    pub fn remaining(&self) -> Option<Duration> {
        let rate = self.hours_per_million?;
        let left = self.chain_length.saturating_sub(self.position) as f64;
        Some(
            Duration::try_from_secs_f64(left * rate * 3600.0 / 1_000_000.0)
                .unwrap_or(Duration::MAX),
        )
    }

    /// Feed one event; returns a report when a milestone is crossed and a rate is known.
    /// A jump past several milestones yields a single report for the furthest one.
    pub fn observe(&mut self, event: &LogEvent) -> Option<ProgressReport> {
        match event {
            LogEvent::Position(p) => self.position = self.position.max(*p),
            LogEvent::Rate(r) if r.is_finite() && *r >= 0.0 => self.hours_per_million = Some(*r),
            _ => return None,
        }

        let fraction = self.fraction();
        let first_pending = self.next;
        let mut crossed = None;
        while self.next < self.milestones.len() && fraction >= self.milestones[self.next] {
            crossed = Some(self.milestones[self.next]);
            self.next += 1;
        }
        let milestone = crossed?;
        let remaining = match self.remaining() {
            Some(remaining) => remaining,
            None => {
                // report once a rate shows up
                self.next = first_pending;
                return None;
            }
        };
        Some(ProgressReport {
            milestone,
            position: self.position,
            chain_length: self.chain_length,
            remaining_secs: remaining.as_secs(),
        })
    }

    pub fn milestones_reported(&self) -> usize {
        self.next
    }
}

/// Stop signal and task of a running watcher
pub struct WatcherHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Signal the watcher and wait for its final pass
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            warn!("Watcher task ended abnormally: {}", e);
        }
    }
}

/// Tail the screen log and forward parsed events to the owning task
pub fn spawn_log_watcher(
    mut tail: LogTail,
    parser: LogLineParser,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<LogEvent>,
) -> WatcherHandle {
    let stop = CancellationToken::new();
    let token = stop.clone();

    let task = tokio::spawn(async move {
        loop {
            let stopping = token.is_cancelled();
            match tail.read_new_lines().await {
                Ok(lines) => {
                    for line in lines {
                        for event in parser.parse(&line) {
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => warn!("Failed to read {}: {}", tail.path.display(), e),
            }
            if stopping {
                return;
            }
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    });

    WatcherHandle { stop, task }
}

/// Judges whether the rate matrix has moved off its initial values
#[derive(Debug, Clone)]
pub struct DegenerateCheck {
    checkpoint_state: u64,
    initial_rate: f64,
    marker: String,
    rate_columns: Option<Vec<usize>>,
}

/// Outcome of inspecting one rate-matrix log row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateVerdict {
    Pending,
    Healthy,
    Degenerate,
}

impl DegenerateCheck {
    pub fn new(config: &WatcherConfig, chain_length: u64) -> Self {
        Self {
            checkpoint_state: (chain_length as f64 * config.degenerate_checkpoint).ceil() as u64,
            initial_rate: config.initial_rate,
            marker: config.rate_column_marker.clone(),
            rate_columns: None,
        }
    }

    pub fn checkpoint_state(&self) -> u64 {
        self.checkpoint_state
    }

    /// Inspect one line of the tab-separated rate log
    pub fn observe(&mut self, line: &str) -> RateVerdict {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return RateVerdict::Pending;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();

        if self.rate_columns.is_none() {
            if fields.first().and_then(|f| f.parse::<u64>().ok()).is_some() {
                // data before any header
                return RateVerdict::Pending;
            }
            let columns: Vec<usize> = fields
                .iter()
                .enumerate()
                .filter(|(_, name)| name.contains(self.marker.as_str()))
                .map(|(i, _)| i)
                .collect();
            if columns.is_empty() {
                warn!("Rate log header has no '{}' columns", self.marker);
                return RateVerdict::Healthy;
            }
            self.rate_columns = Some(columns);
            return RateVerdict::Pending;
        }
        let columns = match &self.rate_columns {
            Some(columns) => columns,
            None => return RateVerdict::Pending,
        };

        let state = match fields.first().and_then(|f| f.parse::<u64>().ok()) {
            Some(state) => state,
            None => return RateVerdict::Pending,
        };
        if state < self.checkpoint_state {
            return RateVerdict::Pending;
        }

        let values: Vec<f64> = columns
            .iter()
            .filter_map(|i| fields.get(*i).and_then(|v| v.parse::<f64>().ok()))
            .collect();
        if values.is_empty() {
            return RateVerdict::Pending;
        }
        if values
            .iter()
            .all(|v| (v - self.initial_rate).abs() <= f64::EPSILON * 16.0)
        {
            RateVerdict::Degenerate
        } else {
            RateVerdict::Healthy
        }
    }
}

pub fn degenerate_message(fraction: f64) -> String {
    format!(
        "The model appears to be numerically degenerate: every transition rate was still at its \
         initial value after {:.0}% of the chain. This usually means there are too many discrete \
         locations for the available sequences; try again with fewer locations.",
        fraction * 100.0
    )
}

/// Watch the rate-matrix log and kill the job if it is still degenerate at the checkpoint
pub fn spawn_degenerate_watcher(
    job_id: JobId,
    rates_log: &Path,
    mut check: DegenerateCheck,
    config: &WatcherConfig,
    registry: ProcessRegistry,
) -> WatcherHandle {
    let stop = CancellationToken::new();
    let token = stop.clone();
    let mut tail = LogTail::new(rates_log);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let fraction = config.degenerate_checkpoint;

    let task = tokio::spawn(async move {
        loop {
            match tail.read_new_lines().await {
                Ok(lines) => {
                    for line in lines {
                        match check.observe(&line) {
                            RateVerdict::Pending => {}
                            RateVerdict::Healthy => {
                                debug!("Job {}: rate matrix moved off its initial values", job_id);
                                return;
                            }
                            RateVerdict::Degenerate => {
                                info!(
                                    "Job {}: rates unchanged at state {}, stopping degenerate model",
                                    job_id,
                                    check.checkpoint_state()
                                );
                                let reason = KillReason::Degenerate(degenerate_message(fraction));
                                if let Err(e) = registry.kill_with_reason(job_id, reason) {
                                    warn!("Job {}: degenerate kill found no process: {}", job_id, e);
                                }
                                return;
                            }
                        }
                    }
                }
                Err(e) => warn!("Job {}: failed to read rate log: {}", job_id, e),
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    });

    WatcherHandle { stop, task }
}
