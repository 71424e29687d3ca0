//! The Check-In Orchestrator (spec.md §4.8): turns a scanned QR payload or a
//! volunteer-typed team id into a persisted attendance transition.
//!
//! Concurrency safety is not this module's job — it is entirely delegated to
//! `CredentialStore::mark_checked_in`'s conditional update (spec.md §5: "the
//! conditional-update discipline in §4.4"). This orchestrator only parses
//! input and shapes the response.

use crate::domain::credential::CredentialStore;
use crate::domain::events::EventBus;
use crate::domain::otp::Clock;
use crate::domain::Error;
use registrar_core::{CheckInEvent, CheckInParticipant, CheckInResponse};
use serde::Deserialize;
use std::sync::Arc;

/// The subset of a QR payload (spec.md §6) a scan actually needs to resolve
/// and identify a participant. Other QR fields (`participant_name`,
/// `is_team_leader`, `timestamp`) are restated by the card for redundancy,
/// not trusted here — the committed member record is authoritative.
#[derive(Debug, Deserialize)]
struct ScanPayloadFields {
    team_code: String,
    participant_id: String,
}

fn parse_scan_payload(payload: &str) -> Result<ScanPayloadFields, Error> {
    serde_json::from_str(payload)
        .map_err(|e| Error::InvalidPayload(format!("could not parse scan payload: {e}")))
}

/// Loose version of spec.md §8 item 2's `^[A-Z0-9]+-\d{3,}$`: a non-empty
/// alphanumeric prefix, a single hyphen, and at least three trailing
/// digits. Good enough to reject a fat-fingered entry without a regex
/// dependency the rest of this crate has no other use for.
fn looks_like_team_id(value: &str) -> bool {
    let Some((prefix, suffix)) = value.rsplit_once('-') else {
        return false;
    };
    !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_alphanumeric())
        && suffix.len() >= 3
        && suffix.chars().all(|c| c.is_ascii_digit())
}

pub struct CheckInOrchestrator {
    credential_store: Arc<CredentialStore>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl CheckInOrchestrator {
    pub fn new(
        credential_store: Arc<CredentialStore>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credential_store,
            events,
            clock,
        }
    }

    /// `POST /attendance/scan` (spec.md §4.8 "Scan"). `raw_payload` is the
    /// string pulled off the QR code, a JSON object per spec.md §6.
    pub async fn scan(&self, raw_payload: &str) -> Result<CheckInResponse, Error> {
        let fields = parse_scan_payload(raw_payload)?;

        let view = self
            .credential_store
            .find_by_team_code(&fields.team_code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no team with team_code {}", fields.team_code)))?;

        let member = view
            .members
            .iter()
            .find(|m| m.participant_id == fields.participant_id)
            .ok_or_else(|| {
                Error::InvalidPayload(format!(
                    "no member with participant_id {} on team {}",
                    fields.participant_id, fields.team_code
                ))
            })?
            .clone();

        let checked_in = self
            .credential_store
            .mark_checked_in(&fields.team_code, self.clock.now())
            .await?;

        self.publish(&checked_in.team);

        Ok(CheckInResponse {
            status: "ok",
            team_id: checked_in.team.team_id,
            team_code: checked_in.team.team_code,
            attendance: true,
            check_in_time: checked_in
                .team
                .check_in_time
                .expect("just-checked-in team has a check_in_time"),
            participant: CheckInParticipant {
                participant_id: member.participant_id,
                name: member.name,
                is_team_leader: member.is_team_leader,
            },
        })
    }

    /// `POST /attendance/checkin` (spec.md §4.8 "Manual"): resolves by
    /// `team_id` and reports the team leader as participant context.
    pub async fn manual_checkin(&self, team_id: &str) -> Result<CheckInResponse, Error> {
        if !looks_like_team_id(team_id) {
            return Err(Error::InvalidPayload(format!(
                "'{team_id}' is not a valid team id"
            )));
        }

        let view = self
            .credential_store
            .find_by_team_id(team_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no team with team_id {team_id}")))?;

        let leader = view
            .members
            .iter()
            .find(|m| m.is_team_leader)
            .expect("every committed team has exactly one leader (spec.md §3)")
            .clone();

        let checked_in = self
            .credential_store
            .mark_checked_in(&view.team.team_code, self.clock.now())
            .await?;

        self.publish(&checked_in.team);

        Ok(CheckInResponse {
            status: "ok",
            team_id: checked_in.team.team_id,
            team_code: checked_in.team.team_code,
            attendance: true,
            check_in_time: checked_in
                .team
                .check_in_time
                .expect("just-checked-in team has a check_in_time"),
            participant: CheckInParticipant {
                participant_id: leader.participant_id,
                name: leader.name,
                is_team_leader: leader.is_team_leader,
            },
        })
    }

    fn publish(&self, team: &registrar_core::Team) {
        self.events.publish(CheckInEvent {
            team_id: team.team_id.clone(),
            team_code: team.team_code.clone(),
            team_name: team.team_name.clone(),
            check_in_time: team
                .check_in_time
                .expect("just-checked-in team has a check_in_time"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::IdentifierMint;
    use crate::domain::otp::clock::test_support::FakeClock;
    use crate::infra::db::DBConnection;
    use registrar_core::{MemberInput, RegistrationRequest};

    fn sample_request() -> RegistrationRequest {
        RegistrationRequest {
            team_name: "Byte Busters".into(),
            leader_name: "Asha Rao".into(),
            leader_email: "asha@example.com".into(),
            leader_phone: "9876543210".into(),
            college_name: "NIT Trichy".into(),
            year: "3".into(),
            domain: "Web".into(),
            team_members: vec![
                MemberInput {
                    name: "Asha Rao".into(),
                    email: "asha@example.com".into(),
                    phone: "9876543210".into(),
                    is_team_leader: true,
                },
                MemberInput {
                    name: "Ravi Shah".into(),
                    email: "ravi@example.com".into(),
                    phone: "9876543211".into(),
                    is_team_leader: false,
                },
            ],
            terms_accepted: true,
        }
    }

    #[sqlx::test(migrations = "./migrations/registrar")]
    async fn scan_checks_in_and_returns_the_scanned_member(pool: sqlx::SqlitePool) {
        let db = DBConnection::new_with_pools("registrar".into(), ":memory:".into(), pool.clone(), pool);
        let credential_store = Arc::new(CredentialStore::new(db));
        let mint = IdentifierMint::new("HACK", 3);
        let view = credential_store
            .insert_team(&mint, &sample_request(), "accesskey1", 8)
            .await
            .unwrap();

        let events = Arc::new(EventBus::new());
        let clock = Arc::new(FakeClock::new());
        let orchestrator = CheckInOrchestrator::new(credential_store, events, clock);

        let second_member = &view.members[1];
        let payload = serde_json::json!({
            "team_code": view.team.team_code,
            "participant_id": second_member.participant_id,
            "participant_name": second_member.name,
            "is_team_leader": false,
            "timestamp": "2026-01-01T00:00:00Z",
        })
        .to_string();

        let response = orchestrator.scan(&payload).await.unwrap();
        assert!(response.attendance);
        assert_eq!(response.participant.participant_id, second_member.participant_id);
        assert!(!response.participant.is_team_leader);
    }

    #[sqlx::test(migrations = "./migrations/registrar")]
    async fn second_scan_of_the_same_team_is_already_checked_in(pool: sqlx::SqlitePool) {
        let db = DBConnection::new_with_pools("registrar".into(), ":memory:".into(), pool.clone(), pool);
        let credential_store = Arc::new(CredentialStore::new(db));
        let mint = IdentifierMint::new("HACK", 3);
        let view = credential_store
            .insert_team(&mint, &sample_request(), "accesskey1", 8)
            .await
            .unwrap();

        let events = Arc::new(EventBus::new());
        let clock = Arc::new(FakeClock::new());
        let orchestrator = CheckInOrchestrator::new(credential_store, events, clock);

        let leader = &view.members[0];
        let payload = serde_json::json!({
            "team_code": view.team.team_code,
            "participant_id": leader.participant_id,
        })
        .to_string();

        orchestrator.scan(&payload).await.unwrap();
        let err = orchestrator.scan(&payload).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyCheckedIn { .. }));
    }

    #[tokio::test]
    async fn malformed_scan_payload_is_rejected() {
        assert!(parse_scan_payload("not json").is_err());
        assert!(parse_scan_payload(r#"{"team_code":"TEAM-AB12CD"}"#).is_err());
    }

    #[test]
    fn team_id_shape_check() {
        assert!(looks_like_team_id("HACK-001"));
        assert!(looks_like_team_id("HACKCSM-1234"));
        assert!(!looks_like_team_id("HACK001"));
        assert!(!looks_like_team_id("HACK-"));
        assert!(!looks_like_team_id("-001"));
        assert!(!looks_like_team_id("HACK-1"));
    }

    #[sqlx::test(migrations = "./migrations/registrar")]
    async fn manual_checkin_resolves_by_team_id_and_returns_leader(pool: sqlx::SqlitePool) {
        let db = DBConnection::new_with_pools("registrar".into(), ":memory:".into(), pool.clone(), pool);
        let credential_store = Arc::new(CredentialStore::new(db));
        let mint = IdentifierMint::new("HACK", 3);
        let view = credential_store
            .insert_team(&mint, &sample_request(), "accesskey1", 8)
            .await
            .unwrap();

        let events = Arc::new(EventBus::new());
        let clock = Arc::new(FakeClock::new());
        let orchestrator = CheckInOrchestrator::new(credential_store, events, clock);

        let response = orchestrator.manual_checkin(&view.team.team_id).await.unwrap();
        assert!(response.participant.is_team_leader);
        assert_eq!(response.participant.name, "Asha Rao");
    }

    #[tokio::test]
    async fn manual_checkin_rejects_malformed_team_id() {
        let events = Arc::new(EventBus::new());
        let clock = Arc::new(FakeClock::new());
        // find_by_team_id is never reached, so an in-memory-only pool isn't needed here.
        let db = DBConnection::new_with_pools(
            "registrar".into(),
            ":memory:".into(),
            sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
        );
        let credential_store = Arc::new(CredentialStore::new(db));
        let orchestrator = CheckInOrchestrator::new(credential_store, events, clock);

        let err = orchestrator.manual_checkin("not-a-team-id").await.unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }
}
