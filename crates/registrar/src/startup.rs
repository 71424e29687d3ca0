use crate::{
    api::routes::{
        checkin_manual, checkin_scan, download_id_cards, get_stats, get_team_by_code,
        get_team_by_id, health, register, resend_artifacts, stats_stream, verify_otp,
    },
    config::Settings,
    domain::card::CardTheme,
    domain::checkin::CheckInOrchestrator,
    domain::credential::CredentialStore,
    domain::events::EventBus,
    domain::otp::{Clock, OtpConfig, OtpStore, SystemClock},
    domain::pending::{PendingConfig, PendingRegistrationStore},
    domain::registration::{RegistrationOrchestrator, RegistrationSettings},
    infra::db::{DBConnection, DatabasePoolConfig, DatabaseType},
    infra::file_utils::create_folder,
    infra::mailer::{Mailer, SmtpSettings},
};
use anyhow::{anyhow, Context};
use axum::{
    body::Body,
    extract::{connect_info::IntoMakeServiceWithConnectInfo, ConnectInfo, Request},
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware::{AddExtension, Next},
    response::IntoResponse,
    routing::{get, post},
    serve::Serve,
    Router,
};
use log::{error, info, warn};
use std::{net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};
use time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::{net::TcpListener, select};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct Application {
    server: Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            config.api_settings.domain, config.api_settings.port
        );
        let listener = SocketAddr::from_str(&address)?;
        let (app_state, background_tasks, cancellation_token) = build_app(config.clone()).await?;
        let server = build_server(listener, app_state, config.api_settings.origins).await?;
        Ok(Self {
            server,
            cancellation_token,
            background_tasks,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        match self.server.with_graceful_shutdown(shutdown_signal()).await {
            Ok(_) => {
                info!("Server shutdown initiated");
                self.cancellation_token.cancel();

                let timeout = tokio::time::sleep(std::time::Duration::from_secs(10));
                select! {
                    _ = self.background_tasks.wait() => {
                        info!("Background tasks completed gracefully");
                    }
                    _ = timeout => {
                        warn!("Background tasks timed out during shutdown");
                    }
                }

                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();

                let _ = tokio::time::timeout(
                    std::time::Duration::from_secs(5),
                    self.background_tasks.wait(),
                )
                .await;

                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registration: Arc<RegistrationOrchestrator>,
    pub checkin: Arc<CheckInOrchestrator>,
    pub credential_store: Arc<CredentialStore>,
    pub otp_store: Arc<OtpStore>,
    pub pending_store: Arc<PendingRegistrationStore>,
    pub events: EventBus,
}

pub async fn build_app(
    config: Settings,
) -> Result<(AppState, TaskTracker, CancellationToken), anyhow::Error> {
    create_folder(&config.db_settings.data_folder);
    create_folder(&config.registration_settings.card_output_dir);

    let db = DBConnection::new(
        &config.db_settings.data_folder,
        "registrar",
        DatabasePoolConfig::from(config.db_settings.clone()),
        DatabaseType::Registrar,
    )
    .await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let credential_store = Arc::new(CredentialStore::new(db));

    let otp_store = Arc::new(OtpStore::new(
        clock.clone(),
        OtpConfig {
            issue_window: Duration::seconds(config.registration_settings.otp_issue_window_secs),
            issue_max: config.registration_settings.otp_issue_max,
            verify_window: Duration::seconds(config.registration_settings.otp_verify_window_secs),
            verify_max: config.registration_settings.otp_verify_max,
            ttl: Duration::minutes(config.registration_settings.otp_ttl_minutes),
            sweep_interval: std::time::Duration::from_secs(
                config.registration_settings.sweep_interval_secs,
            ),
        },
    ));

    let pending_store = Arc::new(PendingRegistrationStore::new(
        clock.clone(),
        PendingConfig {
            ttl: Duration::minutes(config.registration_settings.pending_ttl_minutes),
            sweep_interval: std::time::Duration::from_secs(
                config.registration_settings.sweep_interval_secs,
            ),
        },
    ));

    let mailer = Arc::new(Mailer::new(&SmtpSettings {
        host: config.smtp_settings.host.clone(),
        port: config.smtp_settings.port,
        user: config.smtp_settings.user.clone(),
        pass: config.smtp_settings.pass.clone(),
        from_name: config.smtp_settings.from_name.clone(),
        timeout_secs: config.smtp_settings.timeout_secs,
    }));

    let font_bytes = std::fs::read(&config.card_settings.font_path).with_context(|| {
        format!(
            "failed to read card font at {}",
            config.card_settings.font_path
        )
    })?;
    let card_theme = CardTheme {
        institution_banner: config.card_settings.institution_banner.clone(),
        event_title: config.card_settings.event_title.clone(),
        font_bytes,
    };

    let cancellation_token = CancellationToken::new();
    let background_tasks = TaskTracker::new();
    background_tasks.spawn(otp_store.clone().run_sweeper(cancellation_token.clone()));
    background_tasks.spawn(
        pending_store
            .clone()
            .run_sweeper(cancellation_token.clone()),
    );

    let registration = Arc::new(RegistrationOrchestrator::new(
        otp_store.clone(),
        pending_store.clone(),
        credential_store.clone(),
        mailer,
        card_theme,
        RegistrationSettings {
            team_id_prefix: config.registration_settings.team_id_prefix.clone(),
            team_id_width: config.registration_settings.team_id_width,
            max_team_size: config.registration_settings.max_team_size,
            max_teams: config.registration_settings.max_teams,
            team_code_retry_budget: config.registration_settings.team_code_retry_budget,
            dev_mode: config.registration_settings.dev_mode,
            otp_ttl_minutes: config.registration_settings.otp_ttl_minutes,
            card_output_dir: PathBuf::from(config.registration_settings.card_output_dir.clone()),
        },
        background_tasks.clone(),
    ));

    let events = EventBus::new();
    let checkin = Arc::new(CheckInOrchestrator::new(
        credential_store.clone(),
        Arc::new(events.clone()),
        clock.clone(),
    ));

    background_tasks.close();

    let app_state = AppState {
        registration,
        checkin,
        credential_store,
        otp_store,
        pending_store,
        events,
    };

    Ok((app_state, background_tasks, cancellation_token))
}

pub async fn build_server(
    socket_addr: SocketAddr,
    app_state: AppState,
    origins: Vec<String>,
) -> Result<
    Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    anyhow::Error,
> {
    let listener = TcpListener::bind(socket_addr).await?;

    info!("Setting up service");
    let app = app(app_state, origins);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    info!(
        "Service running @: http://{}:{}",
        socket_addr.ip(),
        socket_addr.port()
    );
    Ok(server)
}

pub fn app(app_state: AppState, origins: Vec<String>) -> Router {
    let origins: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    let registration_routes = Router::new()
        .route("/register", post(register))
        .route("/verify-otp", post(verify_otp))
        .route("/team/by-code/{team_code}", get(get_team_by_code))
        .route("/team/{team_id}", get(get_team_by_id))
        .route("/download/id-cards", get(download_id_cards));

    let attendance_routes = Router::new()
        .route("/attendance/checkin", post(checkin_manual))
        .route("/attendance/scan", post(checkin_scan));

    let admin_routes = Router::new().route(
        "/admin/teams/{team_id}/resend-artifacts",
        post(resend_artifacts),
    );

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(get_stats))
        .route("/stats/stream", get(stats_stream))
        .merge(registration_routes)
        .merge(attendance_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn(log_request))
        .with_state(Arc::new(app_state))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default();
    info!(target: "http_request","new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}

async fn shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

    select! {
        _ = sigint.recv() => info!("Received SIGINT signal"),
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
    }
}
