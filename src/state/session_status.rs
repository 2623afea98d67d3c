use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// The orchestrator loop is dispatching work
    Running,
    /// Dispatch is suspended; the frontier is kept
    Paused,
    /// Halted on its own (dead end, exhausted frontier, limits)
    Completed,
    /// Halted by an external stop signal
    Stopped,
    /// Halted by a storage failure
    Failed,
}

impl SessionStatus {
    /// Returns true once the session can no longer be resumed
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// The condition that ended a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// The dead-end detector reached TERMINATED
    DeadEnd,
    /// Nothing left to fetch and nothing in flight
    FrontierExhausted,
    /// `max_pages` pages were fetched
    MaxPages,
    /// The frontier ran dry only because remaining links were beyond `max_depth`
    MaxDepthReached,
    /// `max_duration_secs` elapsed
    TimeBudget,
    /// An external stop was requested
    StopSignal,
    /// The site graph store failed
    StorageFailure,
}

impl HaltReason {
    /// The session status a halt with this reason leaves behind
    pub fn final_status(&self) -> SessionStatus {
        match self {
            Self::StopSignal => SessionStatus::Stopped,
            Self::StorageFailure => SessionStatus::Failed,
            _ => SessionStatus::Completed,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::DeadEnd => "dead_end",
            Self::FrontierExhausted => "frontier_exhausted",
            Self::MaxPages => "max_pages",
            Self::MaxDepthReached => "max_depth_reached",
            Self::TimeBudget => "time_budget",
            Self::StopSignal => "stop_signal",
            Self::StorageFailure => "storage_failure",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "dead_end" => Some(Self::DeadEnd),
            "frontier_exhausted" => Some(Self::FrontierExhausted),
            "max_pages" => Some(Self::MaxPages),
            "max_depth_reached" => Some(Self::MaxDepthReached),
            "time_budget" => Some(Self::TimeBudget),
            "stop_signal" => Some(Self::StopSignal),
            "storage_failure" => Some(Self::StorageFailure),
            _ => None,
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
