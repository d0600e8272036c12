use std::fmt;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::AppointmentSlot;
use crate::BackoffPolicy;
use crate::FailureKind;
use crate::FetchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationState {
    Idle,
    Fetching,
    Processing,
    Backoff,
    /// Stopped after a fatal error until resumed
    Suspended,
}

impl fmt::Display for LocationState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            LocationState::Idle => "idle",
            LocationState::Fetching => "fetching",
            LocationState::Processing => "processing",
            LocationState::Backoff => "backoff",
            LocationState::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

const STATUS_OK: u16 = 200;
const STATUS_INTERNAL_ERROR: u16 = 500;
const STATUS_BAD_GATEWAY: u16 = 502;
const STATUS_GATEWAY_TIMEOUT: u16 = 504;

/// What the location task does with a fetch outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleStep {
    /// Reconcile these observed slots, then wait the normal interval
    Process(Vec<AppointmentSlot>),
    /// Report the failure and wait `delay`
    Backoff { kind: FailureKind, delay: Duration },
    /// Report and stop polling
    Suspend(String),
}

/// Health of one location as reported to push clients.
///
/// `status` follows HTTP semantics: 200 after a successful poll, 502 when
/// blocked or failing, 504 on timeouts and 500 once suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationStatus {
    pub location: String,
    pub state: LocationState,
    pub status: u16,
    /// Reason of the last failure; cleared by a successful poll
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    /// Last poll that returned at least one slot
    pub last_appointments_found_on: Option<DateTime<Utc>>,
}

/// The parts of a status whose change is worth telling subscribers about
type ReportedHealth = (LocationState, u16, Option<String>);

/// Per-location counters and state transitions, free of I/O
#[derive(Debug, Clone)]
pub struct LocationCycle {
    location: String,
    state: LocationState,
    status: u16,
    message: Option<String>,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_appointments_found_on: Option<DateTime<Utc>>,
    reported: Option<ReportedHealth>,
    backoff: BackoffPolicy,
}

impl LocationCycle {
    pub fn new(
        location: impl Into<String>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            location: location.into(),
            state: LocationState::Idle,
            status: STATUS_OK,
            message: None,
            consecutive_failures: 0,
            last_success: None,
            last_appointments_found_on: None,
            reported: None,
            backoff,
        }
    }

    pub fn state(&self) -> LocationState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Idle -> Fetching; refused while suspended
    pub fn begin_fetch(&mut self) -> bool {
        if self.state == LocationState::Suspended {
            return false;
        }
        self.state = LocationState::Fetching;
        true
    }

    pub fn apply_outcome(
        &mut self,
        outcome: FetchOutcome,
        now: DateTime<Utc>,
    ) -> CycleStep {
        match outcome {
            FetchOutcome::Slots(slots) => self.succeed(slots, now),
            FetchOutcome::Empty => self.succeed(Vec::new(), now),
            FetchOutcome::Blocked => {
                self.fail(FailureKind::Blocked, STATUS_BAD_GATEWAY, "blocked".to_string())
            }
            FetchOutcome::TransientError(reason) => {
                let status = if reason == "timeout" {
                    STATUS_GATEWAY_TIMEOUT
                } else {
                    STATUS_BAD_GATEWAY
                };
                self.fail(FailureKind::Transient, status, reason)
            }
            FetchOutcome::FatalError(reason) => {
                self.state = LocationState::Suspended;
                self.status = STATUS_INTERNAL_ERROR;
                self.message = Some(reason.clone());
                CycleStep::Suspend(reason)
            }
        }
    }

    /// Processing -> Idle
    pub fn finish_processing(&mut self) {
        if self.state == LocationState::Processing {
            self.state = LocationState::Idle;
        }
    }

    /// Backoff -> Idle once the backoff delay has been waited out
    pub fn finish_backoff(&mut self) {
        if self.state == LocationState::Backoff {
            self.state = LocationState::Idle;
        }
    }

    /// Suspended -> Idle with a fresh failure count
    pub fn resume(&mut self) -> bool {
        if self.state != LocationState::Suspended {
            return false;
        }
        self.state = LocationState::Idle;
        self.consecutive_failures = 0;
        // the first status after a resume is always reported
        self.reported = None;
        true
    }

    pub fn status(&self) -> LocationStatus {
        LocationStatus {
            location: self.location.clone(),
            state: self.state,
            status: self.status,
            message: self.message.clone(),
            consecutive_failures: self.consecutive_failures,
            last_success: self.last_success,
            last_appointments_found_on: self.last_appointments_found_on,
        }
    }

    /// Current status if its state, code or message differ from the last one taken
    pub fn take_status_change(&mut self) -> Option<LocationStatus> {
        let health = (self.state, self.status, self.message.clone());
        if self.reported.as_ref() == Some(&health) {
            return None;
        }
        self.reported = Some(health);
        Some(self.status())
    }

    fn succeed(
        &mut self,
        slots: Vec<AppointmentSlot>,
        now: DateTime<Utc>,
    ) -> CycleStep {
        self.state = LocationState::Processing;
        self.status = STATUS_OK;
        self.message = None;
        self.consecutive_failures = 0;
        self.last_success = Some(now);
        if !slots.is_empty() {
            self.last_appointments_found_on = Some(now);
        }
        CycleStep::Process(slots)
    }

    fn fail(
        &mut self,
        kind: FailureKind,
        status: u16,
        reason: String,
    ) -> CycleStep {
        self.state = LocationState::Backoff;
        self.status = status;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.message = Some(reason);
        CycleStep::Backoff {
            kind,
            delay: self.backoff.delay_for(self.consecutive_failures),
        }
    }
}
