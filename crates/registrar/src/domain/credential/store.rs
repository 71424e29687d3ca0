//! Durable team/member persistence (spec.md §4.4), backed by the same
//! `DBConnection` read/write-pool split the rest of this codebase's sqlx
//! access goes through.
//!
//! Uniqueness is enforced by sqlite unique/primary-key indexes, never by an
//! application-level lock (spec.md §5): a `team_code` or `team_id` collision
//! surfaces as a `sqlx::Error::Database` whose message names the violated
//! column, which `insert_team` distinguishes from a `leader_email` collision
//! so the registration orchestrator can retry the former (both re-mint on
//! the next attempt: `team_id` from a re-read count, `team_code` fresh) and
//! reject the latter.

use crate::domain::identity::IdentifierMint;
use crate::domain::Error;
use crate::infra::db::{parse_optional_datetime, parse_required_datetime, DBConnection};
use registrar_core::{ArtifactStatus, Member, RegistrationRequest, Team, TeamView};
use sqlx::{Row, Sqlite, Transaction};
use time::OffsetDateTime;

pub struct CredentialStore {
    db: DBConnection,
}

fn violated_column(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            // sqlite's unique-violation message: "UNIQUE constraint failed: teams.team_code"
            message
                .rsplit_once('.')
                .map(|(_, column)| column.trim().to_string())
        }
        _ => None,
    }
}

/// sqlx's `is_unique_violation()` only recognizes `SQLITE_CONSTRAINT_UNIQUE`
/// (extended code 2067); a non-`INTEGER` primary key (our `team_id TEXT
/// PRIMARY KEY`) conflicts with `SQLITE_CONSTRAINT_PRIMARYKEY` (1555)
/// instead, which `is_unique_violation()` misses. Both are retryable
/// re-mint-and-retry conditions here, so check the raw sqlite extended code
/// in addition to sqlx's classification.
fn is_unique_or_primary_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                || matches!(db_err.code().as_deref(), Some("1555") | Some("2067"))
        }
        _ => false,
    }
}

async fn team_row_by(
    tx_pool: &sqlx::SqlitePool,
    clause: &str,
    value: &str,
) -> Result<Option<Team>, sqlx::Error> {
    let query = format!(
        "SELECT team_id, team_code, team_name, leader_name, leader_email, leader_phone, \
         college_name, year, domain, access_key, attendance_status, check_in_time, \
         created_at, artifact_status FROM teams WHERE {clause} = ?"
    );
    let row = sqlx::query(&query)
        .bind(value)
        .fetch_optional(tx_pool)
        .await?;

    row.map(|row| -> Result<Team, sqlx::Error> {
        Ok(Team {
            team_id: row.get("team_id"),
            team_code: row.get("team_code"),
            team_name: row.get("team_name"),
            leader_name: row.get("leader_name"),
            leader_email: row.get("leader_email"),
            leader_phone: row.get("leader_phone"),
            college_name: row.get("college_name"),
            year: row.get("year"),
            domain: row.get("domain"),
            access_key: row.get("access_key"),
            attendance_status: row.get::<i64, _>("attendance_status") != 0,
            check_in_time: parse_optional_datetime(&row, "check_in_time")?,
            created_at: parse_required_datetime(&row, "created_at")?,
            artifact_status: ArtifactStatus::parse(row.get::<&str, _>("artifact_status")),
        })
    })
    .transpose()
}

async fn members_for(
    pool: &sqlx::SqlitePool,
    team_id: &str,
) -> Result<Vec<Member>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT team_id, idx, name, email, phone, participant_id, is_team_leader \
         FROM members WHERE team_id = ? ORDER BY idx ASC",
    )
    .bind(team_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Member {
            team_id: row.get("team_id"),
            index: row.get("idx"),
            name: row.get("name"),
            email: row.get("email"),
            phone: row.get("phone"),
            participant_id: row.get("participant_id"),
            is_team_leader: row.get::<i64, _>("is_team_leader") != 0,
        })
        .collect())
}

impl CredentialStore {
    pub fn new(db: DBConnection) -> Self {
        Self { db }
    }

    /// Mints identifiers and commits a team plus its members in one
    /// transaction, retrying on a `team_code` or `team_id` collision up to
    /// `retry_budget` times (spec.md §4.1: "retry budget 8"). A `team_id`
    /// collision happens when two registrations race the same
    /// `SELECT COUNT(*)` read and mint the same sequence number (§4.1's
    /// "two successful registrations observed as concurrent"); retrying
    /// re-reads the count inside a fresh transaction, so the loser observes
    /// the winner's commit and advances to the next sequence number.
    pub async fn insert_team(
        &self,
        mint: &IdentifierMint,
        request: &RegistrationRequest,
        access_key: &str,
        retry_budget: u32,
    ) -> Result<TeamView, Error> {
        for _ in 0..retry_budget {
            match self.try_insert_once(mint, request, access_key).await {
                Ok(view) => return Ok(view),
                Err(InsertAttempt::Collision) => continue,
                Err(InsertAttempt::DuplicateEmail) => return Err(Error::EmailAlreadyRegistered),
                Err(InsertAttempt::Db(e)) => return Err(Error::Db(e)),
            }
        }
        Err(Error::Internal(
            "exhausted team-id/team-code mint retry budget".into(),
        ))
    }

    async fn try_insert_once(
        &self,
        mint: &IdentifierMint,
        request: &RegistrationRequest,
        access_key: &str,
    ) -> Result<TeamView, InsertAttempt> {
        let mut tx: Transaction<'_, Sqlite> = self.db.write().begin().await.map_err(InsertAttempt::Db)?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams")
            .fetch_one(&mut *tx)
            .await
            .map_err(InsertAttempt::Db)?;

        let team_id = mint.team_id(count as u64 + 1);
        let team_code = mint.team_code();
        let now = OffsetDateTime::now_utc();
        let created_at = now
            .format(&time::format_description::well_known::Rfc3339)
            .expect("valid rfc3339 timestamp");

        let insert = sqlx::query(
            "INSERT INTO teams (team_id, team_code, team_name, leader_name, leader_email, \
             leader_phone, college_name, year, domain, access_key, attendance_status, \
             check_in_time, created_at, artifact_status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, 'ok')",
        )
        .bind(&team_id)
        .bind(&team_code)
        .bind(&request.team_name)
        .bind(&request.leader_name)
        .bind(request.normalized_email())
        .bind(&request.leader_phone)
        .bind(&request.college_name)
        .bind(&request.year)
        .bind(&request.domain)
        .bind(access_key)
        .bind(&created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            let _ = tx.rollback().await;
            return Err(classify_insert_error(e));
        }

        for (index, member) in request.team_members.iter().enumerate() {
            let participant_id = IdentifierMint::participant_id(&team_code, index);
            // index 0 is always the leader (registrar-core's validation enforces
            // this); bind the same normalized email stored on `teams.leader_email`
            // so the leader invariant (spec.md §3, §8 item 3) holds byte-for-byte,
            // not just case-insensitively.
            let email = if index == 0 {
                request.normalized_email()
            } else {
                member.email.clone()
            };
            let result = sqlx::query(
                "INSERT INTO members (team_id, idx, name, email, phone, participant_id, is_team_leader) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&team_id)
            .bind(index as i64)
            .bind(&member.name)
            .bind(&email)
            .bind(&member.phone)
            .bind(&participant_id)
            .bind(member.is_team_leader)
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                let _ = tx.rollback().await;
                return Err(classify_insert_error(e));
            }
        }

        tx.commit().await.map_err(InsertAttempt::Db)?;

        let team = Team {
            team_id,
            team_code: team_code.clone(),
            team_name: request.team_name.clone(),
            leader_name: request.leader_name.clone(),
            leader_email: request.normalized_email(),
            leader_phone: request.leader_phone.clone(),
            college_name: request.college_name.clone(),
            year: request.year.clone(),
            domain: request.domain.clone(),
            access_key: access_key.to_string(),
            attendance_status: false,
            check_in_time: None,
            created_at: now,
            artifact_status: ArtifactStatus::Ok,
        };
        let members = request
            .team_members
            .iter()
            .enumerate()
            .map(|(index, member)| Member {
                team_id: team.team_id.clone(),
                index: index as i64,
                name: member.name.clone(),
                email: if index == 0 {
                    request.normalized_email()
                } else {
                    member.email.clone()
                },
                phone: member.phone.clone(),
                participant_id: IdentifierMint::participant_id(&team_code, index),
                is_team_leader: member.is_team_leader,
            })
            .collect();

        Ok(TeamView { team, members })
    }

    pub async fn find_by_team_code(&self, team_code: &str) -> Result<Option<TeamView>, Error> {
        let Some(team) = team_row_by(self.db.read(), "team_code", team_code)
            .await
            .map_err(Error::Db)?
        else {
            return Ok(None);
        };
        let members = members_for(self.db.read(), &team.team_id)
            .await
            .map_err(Error::Db)?;
        Ok(Some(TeamView { team, members }))
    }

    pub async fn find_by_team_id(&self, team_id: &str) -> Result<Option<TeamView>, Error> {
        let Some(team) = team_row_by(self.db.read(), "team_id", team_id)
            .await
            .map_err(Error::Db)?
        else {
            return Ok(None);
        };
        let members = members_for(self.db.read(), &team.team_id)
            .await
            .map_err(Error::Db)?;
        Ok(Some(TeamView { team, members }))
    }

    /// Conditional update: only succeeds if the team is not already checked
    /// in, so concurrent scans of the same team all serialize through this
    /// single `UPDATE ... WHERE attendance_status = 0` (spec.md §4.4, §5).
    pub async fn mark_checked_in(&self, team_code: &str, when: OffsetDateTime) -> Result<TeamView, Error> {
        let when_str = when
            .format(&time::format_description::well_known::Rfc3339)
            .expect("valid rfc3339 timestamp");

        let result = sqlx::query(
            "UPDATE teams SET attendance_status = 1, check_in_time = ? \
             WHERE team_code = ? AND attendance_status = 0",
        )
        .bind(&when_str)
        .bind(team_code)
        .execute(self.db.write())
        .await
        .map_err(Error::Db)?;

        let view = self
            .find_by_team_code(team_code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no team with team_code {team_code}")))?;

        if result.rows_affected() == 1 {
            Ok(view)
        } else {
            let check_in_time = view
                .team
                .check_in_time
                .expect("already-checked-in team has a check_in_time");
            Err(Error::AlreadyCheckedIn { check_in_time })
        }
    }

    pub async fn update_artifact_status(
        &self,
        team_id: &str,
        status: ArtifactStatus,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE teams SET artifact_status = ? WHERE team_id = ?")
            .bind(status.as_str())
            .bind(team_id)
            .execute(self.db.write())
            .await
            .map_err(Error::Db)?;
        Ok(())
    }

    pub async fn registered_team_count(&self) -> Result<i64, Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM teams")
            .fetch_one(self.db.read())
            .await
            .map_err(Error::Db)
    }

    pub async fn checked_in_team_count(&self) -> Result<i64, Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM teams WHERE attendance_status = 1")
            .fetch_one(self.db.read())
            .await
            .map_err(Error::Db)
    }

    pub async fn leader_email_is_registered(&self, email: &str) -> Result<bool, Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams WHERE leader_email = ?")
            .bind(email)
            .fetch_one(self.db.read())
            .await
            .map_err(Error::Db)?;
        Ok(count > 0)
    }
}

enum InsertAttempt {
    Collision,
    DuplicateEmail,
    Db(sqlx::Error),
}

fn classify_insert_error(err: sqlx::Error) -> InsertAttempt {
    if is_unique_or_primary_key_violation(&err) {
        match violated_column(&err).as_deref() {
            Some("team_code") | Some("team_id") => InsertAttempt::Collision,
            Some("leader_email") => InsertAttempt::DuplicateEmail,
            _ => InsertAttempt::Db(err),
        }
    } else {
        InsertAttempt::Db(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registrar_core::MemberInput;

    fn sample_request(email: &str) -> RegistrationRequest {
        RegistrationRequest {
            team_name: "Byte Busters".into(),
            leader_name: "Asha Rao".into(),
            leader_email: email.into(),
            leader_phone: "9876543210".into(),
            college_name: "NIT Trichy".into(),
            year: "3".into(),
            domain: "Web".into(),
            team_members: vec![MemberInput {
                name: "Asha Rao".into(),
                email: email.into(),
                phone: "9876543210".into(),
                is_team_leader: true,
            }],
            terms_accepted: true,
        }
    }

    #[sqlx::test(migrations = "./migrations/registrar")]
    async fn insert_then_find_round_trips(pool: sqlx::SqlitePool) {
        let db = DBConnection::new_with_pools(
            "registrar".into(),
            ":memory:".into(),
            pool.clone(),
            pool,
        );
        let store = CredentialStore::new(db);
        let mint = IdentifierMint::new("HACK", 3);
        let request = sample_request("a@x.io");

        let view = store
            .insert_team(&mint, &request, "accesskey1", 8)
            .await
            .unwrap();

        assert_eq!(view.team.team_id, "HACK-001");
        assert_eq!(view.members.len(), 1);
        assert_eq!(view.members[0].participant_id, format!("{}-000", view.team.team_code));

        let by_code = store
            .find_by_team_code(&view.team.team_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_code.team.team_id, view.team.team_id);

        let by_id = store
            .find_by_team_id(&view.team.team_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.team.team_code, view.team.team_code);
    }

    #[sqlx::test(migrations = "./migrations/registrar")]
    async fn duplicate_leader_email_is_rejected(pool: sqlx::SqlitePool) {
        let db = DBConnection::new_with_pools(
            "registrar".into(),
            ":memory:".into(),
            pool.clone(),
            pool,
        );
        let store = CredentialStore::new(db);
        let mint = IdentifierMint::new("HACK", 3);
        let request = sample_request("dup@x.io");

        store.insert_team(&mint, &request, "key1", 8).await.unwrap();
        let err = store
            .insert_team(&mint, &request, "key2", 8)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmailAlreadyRegistered));
    }

    #[sqlx::test(migrations = "./migrations/registrar")]
    async fn mark_checked_in_is_conditional(pool: sqlx::SqlitePool) {
        let db = DBConnection::new_with_pools(
            "registrar".into(),
            ":memory:".into(),
            pool.clone(),
            pool,
        );
        let store = CredentialStore::new(db);
        let mint = IdentifierMint::new("HACK", 3);
        let request = sample_request("checkin@x.io");
        let view = store
            .insert_team(&mint, &request, "key1", 8)
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        let checked_in = store
            .mark_checked_in(&view.team.team_code, now)
            .await
            .unwrap();
        assert!(checked_in.team.attendance_status);

        let err = store
            .mark_checked_in(&view.team.team_code, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyCheckedIn { .. }));
    }
}
