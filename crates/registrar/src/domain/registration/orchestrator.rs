//! The two-phase registration protocol (spec.md §4.7):
//! `Register → SendOTP` and `VerifyOTP → CommitTeam → IssueArtifacts → Mail → Cleanup`.

use crate::domain::card::{assemble_document, CardRenderer, CardTheme};
use crate::domain::credential::CredentialStore;
use crate::domain::identity::IdentifierMint;
use crate::domain::otp::OtpStore;
use crate::domain::pending::PendingRegistrationStore;
use crate::infra::mailer::Mailer;
use crate::domain::Error;
use registrar_core::{validate_registration_request, FieldViolation, RegistrationRequest, TeamView};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone)]
pub struct RegistrationSettings {
    pub team_id_prefix: String,
    pub team_id_width: usize,
    pub max_team_size: usize,
    pub max_teams: i64,
    pub team_code_retry_budget: u32,
    pub dev_mode: bool,
    pub otp_ttl_minutes: i64,
    pub card_output_dir: PathBuf,
}

pub struct RegisterOutcome {
    pub message: &'static str,
    pub expires_in_sec: u64,
    /// Only populated when `dev_mode` is on and the mailer couldn't be
    /// reached — never in a production configuration (spec.md §9: "gate by
    /// an explicit configuration flag that defaults to off").
    pub dev_otp: Option<String>,
}

pub struct VerifyOutcome {
    pub team: TeamView,
    /// Set when the card/document/mail pipeline failed after the team was
    /// already committed (spec.md §4.7 step 5-6: never a failure of the
    /// commit itself).
    pub artifact_warning: Option<String>,
}

pub struct RegistrationOrchestrator {
    mint: IdentifierMint,
    otp_store: Arc<OtpStore>,
    pending_store: Arc<PendingRegistrationStore>,
    credential_store: Arc<CredentialStore>,
    mailer: Arc<Mailer>,
    card_theme: CardTheme,
    settings: RegistrationSettings,
    /// Shared with the OTP/pending-store sweepers (spec.md §4.6, §9): OTP
    /// mail is dispatched on this tracker instead of being awaited inline,
    /// so a slow or down SMTP server never stalls the `/register` response.
    background_tasks: TaskTracker,
}

impl RegistrationOrchestrator {
    pub fn new(
        otp_store: Arc<OtpStore>,
        pending_store: Arc<PendingRegistrationStore>,
        credential_store: Arc<CredentialStore>,
        mailer: Arc<Mailer>,
        card_theme: CardTheme,
        settings: RegistrationSettings,
        background_tasks: TaskTracker,
    ) -> Self {
        let mint = IdentifierMint::new(settings.team_id_prefix.clone(), settings.team_id_width);
        Self {
            mint,
            otp_store,
            pending_store,
            credential_store,
            mailer,
            card_theme,
            settings,
            background_tasks,
        }
    }

    pub async fn register(&self, request: RegistrationRequest) -> Result<RegisterOutcome, Error> {
        validate_registration_request(&request)?;

        if request.team_members.len() > self.settings.max_team_size {
            return Err(Error::Validation(vec![FieldViolation::new(
                "team_members",
                format!("teams are capped at {} members", self.settings.max_team_size),
            )]));
        }

        if self.credential_store.registered_team_count().await? >= self.settings.max_teams {
            return Err(Error::Validation(vec![FieldViolation::new(
                "team_name",
                "registration is closed: event capacity reached",
            )]));
        }

        let email = request.normalized_email();

        if self.credential_store.leader_email_is_registered(&email).await? {
            return Err(Error::EmailAlreadyRegistered);
        }

        self.pending_store.put(&email, request).await;

        let code = self.otp_store.issue(&email).await?;

        // Mailer configuration is checked synchronously (no network I/O) so the
        // dev_mode echo / Unconfigured-in-production behavior is unchanged; the
        // actual send is dispatched to the background tracker so the response
        // never blocks on SMTP latency (spec.md §4.6: "not ... longer than ~2s",
        // §9: "asynchronous mail dispatch task with a bounded retry policy").
        let mut dev_otp = None;
        if let Some(reason) = self.mailer.configuration_error() {
            if self.settings.dev_mode {
                log::warn!("mailer unconfigured ({reason}); echoing OTP in dev_mode response");
                dev_otp = Some(code);
            } else {
                return Err(Error::Unconfigured(reason.to_string()));
            }
        } else {
            let mailer = self.mailer.clone();
            let email_for_task = email.clone();
            let code_for_task = code;
            let ttl_minutes = self.settings.otp_ttl_minutes;
            self.background_tasks.spawn(async move {
                match mailer.send_otp(&email_for_task, &code_for_task, ttl_minutes).await {
                    Ok(()) => {}
                    Err(e) if e.is_retryable() => {
                        log::warn!(
                            "OTP mail delivery failed for {email_for_task}, will not retry further: {e}"
                        );
                    }
                    Err(e) => {
                        log::warn!("OTP mail delivery rejected for {email_for_task}: {e}");
                    }
                }
            });
        }

        Ok(RegisterOutcome {
            message: "verification code sent",
            expires_in_sec: self.settings.otp_ttl_minutes as u64 * 60,
            dev_otp,
        })
    }

    pub async fn verify_otp(&self, leader_email: &str, otp: &str) -> Result<VerifyOutcome, Error> {
        let email = leader_email.trim().to_lowercase();

        self.otp_store.verify(&email, otp).await?;

        let Some(request) = self.pending_store.take(&email).await else {
            return Err(Error::RegistrationExpired);
        };

        let access_key = self.mint.access_key();
        let view = self
            .credential_store
            .insert_team(&self.mint, &request, &access_key, self.settings.team_code_retry_budget)
            .await?;

        self.otp_store.remove(&email).await;

        let artifact_warning = self.issue_artifacts(&view).await.err();

        Ok(VerifyOutcome { team: view, artifact_warning })
    }

    /// Renders every member's card, in index order. Shared by the mail
    /// pipeline and the on-demand re-download handler so both produce
    /// byte-identical documents.
    fn render_cards(&self, view: &TeamView) -> Result<Vec<image::RgbaImage>, String> {
        let renderer = CardRenderer::new(&self.card_theme).map_err(|e| e.to_string())?;
        view.members
            .iter()
            .enumerate()
            .map(|(i, member)| renderer.render(&view.team, member, i).map_err(|e| e.to_string()))
            .collect::<Result<_, _>>()
    }

    /// Renders and assembles the document for `view` and returns its path,
    /// without mailing. Used by the `GET /download/id-cards` re-download
    /// path (spec.md §6), where the caller streams the file and is
    /// responsible for deleting it afterwards.
    pub async fn render_document(&self, view: &TeamView) -> Result<PathBuf, Error> {
        let cards = self.render_cards(view).map_err(Error::Internal)?;
        assemble_document(&view.team.team_id, &self.settings.card_output_dir, &cards)
            .map_err(|e| Error::Internal(e.to_string()))
    }

    /// Renders cards, assembles the document, mails it, and cleans up the
    /// temp file. Any failure here is swallowed into a warning string and
    /// recorded on the team's `artifact_status` — it never unwinds the
    /// already-committed registration (spec.md §4.5, §7).
    async fn render_and_mail(&self, view: &TeamView) -> Result<(), String> {
        let cards = self.render_cards(view)?;

        let path = assemble_document(&view.team.team_id, &self.settings.card_output_dir, &cards)
            .map_err(|e| e.to_string())?;

        let member_names: Vec<String> = view.members.iter().map(|m| m.name.clone()).collect();
        let send_result = self
            .mailer
            .send_confirmation(
                &view.team.leader_email,
                &view.team.team_id,
                &view.team.team_code,
                &member_names,
                &path,
            )
            .await;

        let _ = tokio::fs::remove_file(&path).await;

        send_result.map_err(|e| e.to_string())
    }

    /// Runs the artifact pipeline and, on failure, records the
    /// recoverable-failure marker rather than propagating the error.
    async fn issue_artifacts(&self, view: &TeamView) -> Result<(), String> {
        let result = self.render_and_mail(view).await;

        if let Err(reason) = &result {
            log::warn!(
                "artifact pipeline failed for team {}: {reason}",
                view.team.team_id
            );
            let status = registrar_core::ArtifactStatus::PendingRetry;
            if let Err(e) = self
                .credential_store
                .update_artifact_status(&view.team.team_id, status)
                .await
            {
                log::error!("failed to record artifact_status for {}: {e}", view.team.team_id);
            }
        }

        result
    }

    /// Re-renders and re-mails the card document for an already-committed
    /// team (the operator-facing retry path for a `pending_retry`/`failed`
    /// `artifact_status`).
    pub async fn retry_artifacts(&self, team_id: &str) -> Result<(), Error> {
        let view = self
            .credential_store
            .find_by_team_id(team_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no team with team_id {team_id}")))?;

        match self.issue_artifacts(&view).await {
            Ok(()) => {
                self.credential_store
                    .update_artifact_status(team_id, registrar_core::ArtifactStatus::Ok)
                    .await?;
                Ok(())
            }
            Err(reason) => Err(Error::Internal(reason)),
        }
    }
}
