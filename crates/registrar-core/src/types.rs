//! Wire/storage shapes shared across the registration and check-in flows.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A durable, committed team record (spec.md §3 "Team").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub team_id: String,
    pub team_code: String,
    pub team_name: String,
    pub leader_name: String,
    pub leader_email: String,
    pub leader_phone: String,
    pub college_name: String,
    pub year: String,
    pub domain: String,
    /// Grants unauthenticated re-download of the team's card document.
    pub access_key: String,
    pub attendance_status: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub check_in_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub artifact_status: ArtifactStatus,
}

/// Recoverable-failure marker for the post-commit artifact pipeline
/// (spec.md §7: "the system records a recoverable-failure marker on the
/// team for the operator UI").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Ok,
    PendingRetry,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Ok => "ok",
            ArtifactStatus::PendingRetry => "pending_retry",
            ArtifactStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending_retry" => ArtifactStatus::PendingRetry,
            "failed" => ArtifactStatus::Failed,
            _ => ArtifactStatus::Ok,
        }
    }
}

/// One team participant, including the leader at index 0 (spec.md §3 "Member").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub team_id: String,
    pub index: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub participant_id: String,
    pub is_team_leader: bool,
}

/// A team with its members attached, the shape returned by team lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamView {
    #[serde(flatten)]
    pub team: Team,
    pub members: Vec<Member>,
}

/// One entry of the `team_members` array in a registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInput {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub is_team_leader: bool,
}

/// The validated registration payload, held by the pending store until OTP
/// verification (spec.md §3 "PendingRegistration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub team_name: String,
    pub leader_name: String,
    pub leader_email: String,
    pub leader_phone: String,
    pub college_name: String,
    pub year: String,
    pub domain: String,
    pub team_members: Vec<MemberInput>,
    pub terms_accepted: bool,
}

impl RegistrationRequest {
    /// `leader_email`, normalized to lowercase — the key used by every
    /// in-memory store and the credential store's unique index.
    pub fn normalized_email(&self) -> String {
        self.leader_email.trim().to_lowercase()
    }
}

/// The JSON string embedded in a card's QR code (spec.md §6 "QR payload").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    pub team_code: String,
    pub participant_id: String,
    pub participant_name: String,
    pub is_team_leader: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Body of `POST /verify-otp` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    pub leader_email: String,
    pub otp: String,
}

/// Body of `POST /attendance/scan`: the raw string pulled off a QR code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub payload: String,
}

/// Body of `POST /attendance/checkin`: a volunteer-typed team identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualCheckInRequest {
    pub team_id: String,
}

/// Response shape for a successful check-in of either mode (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub status: &'static str,
    pub team_id: String,
    pub team_code: String,
    pub attendance: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub check_in_time: OffsetDateTime,
    pub participant: CheckInParticipant,
}

/// The member context returned alongside a check-in (the scanned member for
/// a QR scan, the team leader for a manual check-in).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInParticipant {
    pub participant_id: String,
    pub name: String,
    pub is_team_leader: bool,
}

/// Event published to the in-process pub-sub bus on a successful check-in,
/// consumed by any attached live-dashboard stream (spec.md §4.8 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInEvent {
    pub team_id: String,
    pub team_code: String,
    pub team_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub check_in_time: OffsetDateTime,
}

/// `GET /stats` aggregate counters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stats {
    pub registered_teams: i64,
    pub checked_in_teams: i64,
    pub pending_registrations: i64,
    pub otps_outstanding: i64,
}
