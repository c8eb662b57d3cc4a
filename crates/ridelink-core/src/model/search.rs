// ── Search domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use super::common::GeoPoint;

/// A prospective serving agent. Replaced wholesale on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDriver {
    pub id: String,
    pub name: Option<String>,
    pub distance_km: f64,
    pub rating: Option<f32>,
    /// Estimated arrival at pickup, in seconds.
    pub eta_secs: Option<u32>,
}

impl From<ridelink_api::query::AgentSummary> for CandidateDriver {
    fn from(agent: ridelink_api::query::AgentSummary) -> Self {
        Self {
            id: agent.id,
            name: agent.name,
            distance_km: agent.distance,
            rating: agent.rating,
            eta_secs: agent.eta,
        }
    }
}

/// Matching priority hint sent with each search attempt.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PriorityHint {
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SearchStatus {
    Idle,
    Searching,
    Found,
    Timeout,
    Cancelled,
}

/// What the caller asks the coordinator to find.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub engagement_id: String,
    pub pickup: GeoPoint,
}

/// The live (or most recent) search, as observers see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSession {
    pub engagement_id: String,
    pub radius_km: f64,
    /// Zero-based attempt index.
    pub attempt: u32,
    pub max_attempts: u32,
    pub deadline_at: DateTime<Utc>,
    pub attempt_token: u64,
    pub priority: PriorityHint,
    pub status: SearchStatus,
    /// Candidate of the current attempt, kept while a confirm is pending
    /// or after it failed.
    pub candidate: Option<CandidateDriver>,
    /// Set once the backend accepted the confirmation.
    pub confirmed: bool,
}

impl SearchSession {
    /// `Searching`, or `Found` with the confirmation still outstanding.
    pub fn is_active(&self) -> bool {
        match self.status {
            SearchStatus::Searching => true,
            SearchStatus::Found => !self.confirmed,
            SearchStatus::Idle | SearchStatus::Timeout | SearchStatus::Cancelled => false,
        }
    }
}

/// Terminal result of a search run.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Confirmed(CandidateDriver),
    /// Every attempt ran out; the caller may retry from scratch or abandon.
    Exhausted { attempts: u32 },
    Cancelled,
}

impl SearchOutcome {
    pub fn into_result(self) -> Result<CandidateDriver, crate::error::SearchError> {
        match self {
            Self::Confirmed(candidate) => Ok(candidate),
            Self::Exhausted { attempts } => {
                Err(crate::error::SearchError::NoCandidates { attempts })
            }
            Self::Cancelled => Err(crate::error::SearchError::Cancelled),
        }
    }
}
