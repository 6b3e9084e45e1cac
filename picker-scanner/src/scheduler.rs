//! Scan scheduler.
//!
//! Runs scans on a cron schedule and supports manual triggers:
//! - Daily pre-market scans (default `0 15 9 * * 1-5`)
//! - Manual trigger from the CLI
//! - Optional report files after every successful scan
//!
//! Every scan publishes into the session's snapshot store. The risk guard's
//! daily counters are reset when the first scan of a new day starts.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use picker_common::config::{expand_path, OutputConfig, ScheduleConfig};

use crate::data::UniverseSource;
use crate::plan::RiskConfig;
use crate::report::{ReportFormat, ScanReport};
use crate::result::ScanResult;
use crate::screener::FilterCriteria;
use crate::session::{ScanCanceller, ScanSession};

/// History entries kept in memory.
const MAX_HISTORY: usize = 100;

/// How often the run loop checks the schedule.
const TICK_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Scheduler State
// ============================================================================

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Waiting for the next trigger
    Idle,
    /// Running a scan
    Running,
    /// Stopped
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Scheduler status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub next_scan_at: Option<DateTime<Utc>>,
    pub last_scan_id: Option<String>,
    pub last_opportunity_count: Option<usize>,
    pub error_message: Option<String>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            last_scan_at: None,
            next_scan_at: None,
            last_scan_id: None,
            last_opportunity_count: None,
            error_message: None,
        }
    }
}

/// Completed scan summary kept in the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanHistoryEntry {
    pub scan_id: String,
    pub version: u64,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub universe_size: usize,
    pub opportunity_count: usize,
    pub top_symbol: Option<String>,
}

impl From<&ScanResult> for ScanHistoryEntry {
    fn from(result: &ScanResult) -> Self {
        Self {
            scan_id: result.scan_id.clone(),
            version: result.version,
            completed_at: Utc::now(),
            duration_ms: result.duration_ms,
            universe_size: result.universe_size,
            opportunity_count: result.opportunities.len(),
            top_symbol: result.opportunities.first().map(|o| o.symbol.clone()),
        }
    }
}

/// Whether `schedule` fires in `(last_check, now]`.
pub fn is_due(schedule: &Schedule, last_check: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    schedule
        .after(&last_check)
        .next()
        .is_some_and(|fire_at| fire_at <= now)
}

// ============================================================================
// Scan Scheduler
// ============================================================================

/// Cron-driven scan runner around one [`ScanSession`].
pub struct ScanScheduler {
    session: Arc<ScanSession>,
    universe: Arc<dyn UniverseSource>,
    criteria: FilterCriteria,
    risk: RiskConfig,
    schedule: Schedule,
    cron: String,
    output: OutputConfig,
    canceller: ScanCanceller,
    state: Arc<RwLock<SchedulerState>>,
    status: Arc<RwLock<SchedulerStatus>>,
    history: Arc<RwLock<Vec<ScanHistoryEntry>>>,
    last_scan_day: Arc<RwLock<Option<NaiveDate>>>,
}

impl ScanScheduler {
    /// Create a scheduler. Fails if the cron expression does not parse.
    pub fn new(
        session: Arc<ScanSession>,
        universe: Arc<dyn UniverseSource>,
        criteria: FilterCriteria,
        risk: RiskConfig,
        schedule: &ScheduleConfig,
    ) -> Result<Self> {
        let parsed = Schedule::from_str(&schedule.cron)
            .with_context(|| format!("Invalid scan cron: {}", schedule.cron))?;

        Ok(Self {
            session,
            universe,
            criteria,
            risk,
            schedule: parsed,
            cron: schedule.cron.clone(),
            output: OutputConfig::default(),
            canceller: ScanCanceller::new(),
            state: Arc::new(RwLock::new(SchedulerState::Idle)),
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            history: Arc::new(RwLock::new(Vec::new())),
            last_scan_day: Arc::new(RwLock::new(None)),
        })
    }

    /// Write reports according to `output`.
    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    /// Next time the schedule fires.
    pub fn next_scan_at(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn status(&self) -> SchedulerStatus {
        let mut status = self.status.read().await.clone();
        status.next_scan_at = self.next_scan_at();
        status
    }

    /// Most recent history entries, newest first.
    pub async fn history(&self, limit: usize) -> Vec<ScanHistoryEntry> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Run the schedule until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> Result<()> {
        info!(
            cron = %self.cron,
            next = ?self.next_scan_at(),
            "Scan scheduler started"
        );

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        let mut last_check = Utc::now();

        loop {
            interval.tick().await;
            if self.state().await == SchedulerState::Stopped {
                break;
            }

            let now = Utc::now();
            if is_due(&self.schedule, last_check, now) {
                info!("Scheduled scan due");
                if let Err(e) = self.trigger_scan().await {
                    warn!(error = %e, "Scheduled scan failed");
                }
            }
            last_check = now;
        }

        info!("Scan scheduler loop exited");
        Ok(())
    }

    /// Run one scan now.
    pub async fn trigger_scan(&self) -> Result<Arc<ScanResult>> {
        {
            let mut state = self.state.write().await;
            match *state {
                SchedulerState::Running => return Err(anyhow!("A scan is already in progress")),
                SchedulerState::Stopped => return Err(anyhow!("Scheduler is stopped")),
                SchedulerState::Idle => *state = SchedulerState::Running,
            }
        }
        self.status.write().await.state = SchedulerState::Running;

        self.roll_trading_day().await;

        let result = self
            .session
            .run_scan_cancellable(
                self.universe.as_ref(),
                &self.criteria,
                &self.risk,
                &self.canceller,
            )
            .await;

        let next_state = {
            let mut state = self.state.write().await;
            if *state == SchedulerState::Running {
                *state = SchedulerState::Idle;
            }
            *state
        };

        match result {
            Ok(result) => {
                {
                    let mut status = self.status.write().await;
                    status.state = next_state;
                    status.last_scan_at = Some(result.timestamp);
                    status.last_scan_id = Some(result.scan_id.clone());
                    status.last_opportunity_count = Some(result.opportunities.len());
                    status.error_message = None;
                }
                {
                    let mut history = self.history.write().await;
                    history.push(ScanHistoryEntry::from(result.as_ref()));
                    if history.len() > MAX_HISTORY {
                        history.remove(0);
                    }
                }

                if self.output.save_reports {
                    self.save_reports(&result);
                }

                Ok(result)
            }
            Err(e) => {
                let mut status = self.status.write().await;
                status.state = next_state;
                status.error_message = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Stop the scheduler, aborting an in-flight scan.
    pub async fn stop(&self) {
        *self.state.write().await = SchedulerState::Stopped;
        self.status.write().await.state = SchedulerState::Stopped;
        self.canceller.cancel();

        info!("Scan scheduler stopped");
    }

    // ========================================================================
    // Internal Methods
    // ========================================================================

    async fn roll_trading_day(&self) {
        let today = Utc::now().date_naive();
        let mut last_day = self.last_scan_day.write().await;

        if last_day.is_some_and(|day| day != today) {
            self.session.guard().write().await.reset_daily();
        }
        *last_day = Some(today);
    }

    fn save_reports(&self, result: &Arc<ScanResult>) {
        let report = ScanReport::new(Arc::clone(result));
        let dir = expand_path(&self.output.report_dir);

        let formats: Vec<ReportFormat> = self
            .output
            .formats
            .iter()
            .filter_map(|f| match f.parse() {
                Ok(format) => Some(format),
                Err(e) => {
                    warn!(format = %f, error = %e, "Skipping unknown report format");
                    None
                }
            })
            .collect();

        match report.save_all(&dir, &formats) {
            Ok(paths) => {
                for path in paths {
                    debug!(path = %path.display(), "Saved report");
                }
                info!(dir = %dir.display(), count = formats.len(), "Reports saved");
            }
            Err(e) => warn!(error = %e, "Failed to save reports"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
