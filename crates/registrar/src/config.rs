use anyhow::anyhow;
use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::{self, File},
    io::{Read, Write},
    path::PathBuf,
};
use time::{format_description::well_known::Iso8601, OffsetDateTime};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to Settings.toml file holding configuration options
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level to run with the service (default: info)
    #[arg(short, long)]
    pub level: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    pub config: Option<String>,
    pub level: Option<String>,
    pub db_settings: DBSettings,
    pub api_settings: APISettings,
    pub smtp_settings: SmtpSettingsConfig,
    pub registration_settings: RegistrationSettingsConfig,
    pub card_settings: CardSettingsConfig,
    /// Admin authentication is out of scope (spec.md §1); this is only
    /// carried so its presence/absence is visible in the loaded config.
    #[serde(skip)]
    pub jwt_secret: Option<String>,
}

impl ConfigurableSettings for Settings {
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings) {
        if let Some(level) = &cli_settings.level {
            self.level = Some(level.clone());
        }
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/local.toml")
    }
}

impl Settings {
    /// Layers environment variables over whatever the TOML file set
    /// (spec.md §6: `DB_URL`, `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`,
    /// `SMTP_PASS`, `BASE_URL`, `JWT_SECRET`, `DEV_MODE`), the same escape
    /// hatch pattern as `SqliteConfig::from_env`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DB_URL") {
            self.db_settings.data_folder = url;
        }
        if let Ok(host) = env::var("SMTP_HOST") {
            self.smtp_settings.host = host;
        }
        if let Ok(port) = env::var("SMTP_PORT") {
            if let Ok(port) = port.parse() {
                self.smtp_settings.port = port;
            }
        }
        if let Ok(user) = env::var("SMTP_USER") {
            self.smtp_settings.user = user;
        }
        if let Ok(pass) = env::var("SMTP_PASS") {
            self.smtp_settings.pass = pass;
        }
        if let Ok(base_url) = env::var("BASE_URL") {
            self.registration_settings.base_url = base_url;
        }
        if let Ok(dev_mode) = env::var("DEV_MODE") {
            self.registration_settings.dev_mode = dev_mode.eq_ignore_ascii_case("true");
        }
        // Admin authentication is out of scope (spec.md §1); JWT_SECRET is
        // only carried so a future admin surface has somewhere to read it
        // from, and so its absence is visible in the config dump.
        self.jwt_secret = env::var("JWT_SECRET").ok();
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DBSettings {
    pub data_folder: String,
    pub read_max_connections: u32,
    pub read_min_connections: u32,
    pub write_max_connections: u32,
    pub write_min_connections: u32,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub sqlite_config: SqliteConfigSerde,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SqliteConfigSerde {
    pub mode: String,
    pub cache: String,
    pub busy_timeout_ms: u32,
    pub journal_mode: String,
    pub synchronous: String,
    pub cache_size: i32,
    pub foreign_keys: bool,
    pub wal_autocheckpoint: Option<u32>,
    pub temp_store: String,
    pub mmap_size: Option<u64>,
    pub page_size: Option<u32>,
}

impl Default for DBSettings {
    fn default() -> Self {
        DBSettings {
            data_folder: String::from("./data"),
            read_max_connections: 12,
            read_min_connections: 2,
            write_max_connections: 5,
            write_min_connections: 1,
            idle_timeout_secs: 600,   // 10 minutes
            acquire_timeout_secs: 15, // 15 seconds
            sqlite_config: SqliteConfigSerde::default(),
        }
    }
}

impl Default for SqliteConfigSerde {
    fn default() -> Self {
        Self {
            mode: "ReadWriteCreate".to_string(),
            cache: "Shared".to_string(),
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            cache_size: 1000000,
            foreign_keys: true,
            wal_autocheckpoint: Some(1000),
            temp_store: "Memory".to_string(),
            mmap_size: Some(268435456), // 256MB
            page_size: Some(4096),
        }
    }
}

impl SqliteConfigSerde {
    pub fn development() -> Self {
        Self {
            busy_timeout_ms: 10000,
            cache_size: 100000,
            ..Default::default()
        }
    }

    pub fn production() -> Self {
        Self {
            synchronous: "FULL".to_string(),
            cache_size: 2000000,
            wal_autocheckpoint: Some(10000),
            mmap_size: Some(1073741824), // 1GB
            ..Default::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            mode: "Memory".to_string(),
            journal_mode: "MEMORY".to_string(),
            synchronous: "OFF".to_string(),
            temp_store: "Memory".to_string(),
            busy_timeout_ms: 1000,
            cache_size: 10000,
            wal_autocheckpoint: None,
            mmap_size: None,
            page_size: None,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct APISettings {
    pub domain: String,
    pub port: String,
    pub origins: Vec<String>,
}

impl Default for APISettings {
    fn default() -> Self {
        APISettings {
            domain: String::from("127.0.0.1"),
            port: String::from("9990"),
            origins: vec![String::from("http://localhost:9990")],
        }
    }
}

/// SMTP transport configuration (spec.md §4.6). Loaded eagerly at startup
/// and handed to `Mailer::new`, which treats a missing host/user/credential
/// as `Unconfigured` rather than attempting a connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmtpSettingsConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from_name: String,
    pub timeout_secs: u64,
}

impl Default for SmtpSettingsConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            user: String::new(),
            pass: String::new(),
            from_name: String::from("Hackathon Registration"),
            timeout_secs: 20,
        }
    }
}

/// Registration/check-in policy knobs left open by spec.md as
/// "policy-configurable" or "a single configuration value" (§3, §9).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationSettingsConfig {
    pub team_id_prefix: String,
    pub team_id_width: usize,
    pub max_team_size: usize,
    pub max_teams: i64,
    pub team_code_retry_budget: u32,
    pub dev_mode: bool,
    pub otp_ttl_minutes: i64,
    pub otp_issue_window_secs: i64,
    pub otp_issue_max: usize,
    pub otp_verify_window_secs: i64,
    pub otp_verify_max: usize,
    pub pending_ttl_minutes: i64,
    pub sweep_interval_secs: u64,
    pub card_output_dir: String,
    pub base_url: String,
}

impl Default for RegistrationSettingsConfig {
    fn default() -> Self {
        Self {
            team_id_prefix: String::from("HACK"),
            team_id_width: 3,
            max_team_size: 50,
            max_teams: 10_000,
            team_code_retry_budget: 8,
            dev_mode: false,
            otp_ttl_minutes: 5,
            otp_issue_window_secs: 60,
            otp_issue_max: 3,
            otp_verify_window_secs: 15 * 60,
            otp_verify_max: 3,
            pending_ttl_minutes: 15,
            sweep_interval_secs: 3600,
            card_output_dir: String::from("./data/id-cards"),
            base_url: String::from("http://127.0.0.1:9990"),
        }
    }
}

/// ID card rendering inputs (spec.md §4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardSettingsConfig {
    pub institution_banner: String,
    pub event_title: String,
    pub font_path: String,
}

impl Default for CardSettingsConfig {
    fn default() -> Self {
        Self {
            institution_banner: String::from("National Institute of Technology"),
            event_title: String::from("HackNITT 2026"),
            font_path: String::from("./assets/fonts/card-sans.ttf"),
        }
    }
}

pub fn get_settings() -> Result<Settings, anyhow::Error> {
    let mut settings: Settings = get_settings_with_cli(Cli::parse().into())?;
    settings.apply_env_overrides();
    Ok(settings)
}

pub struct CliSettings {
    pub config: Option<String>,
    pub level: Option<String>,
}

impl From<Cli> for CliSettings {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            level: cli.level,
        }
    }
}
pub trait ConfigurableSettings: Serialize + for<'de> Deserialize<'de> + Default {
    /// Apply CLI settings after loading from file
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings);

    /// Get the default config file path
    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/settings.toml")
    }

    /// Get the config directory path
    fn config_directory() -> PathBuf {
        PathBuf::from("./config")
    }
}

pub fn get_settings_with_cli<T: ConfigurableSettings>(
    cli_settings: CliSettings,
) -> Result<T, anyhow::Error> {
    let mut settings = if let Some(config_path) = cli_settings.config.clone() {
        let path = PathBuf::from(config_path);

        let absolute_path = if path.is_absolute() {
            path
        } else {
            env::current_dir()?.join(path)
        };

        let file_settings = match File::open(absolute_path) {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)
                    .map_err(|e| anyhow!("Failed to read config: {}", e))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to map config to settings: {}", e))?
            }
            Err(err) => return Err(anyhow!("Failed to find file: {}", err)),
        };
        file_settings
    } else {
        let default_path = T::default_config_path();
        match File::open(&default_path) {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)
                    .map_err(|e| anyhow!("Failed to read default config: {}", e))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to parse default config: {}", e))?
            }
            Err(_) => {
                // Create default settings
                let default_settings = T::default();

                // Create config directory if it doesn't exist
                fs::create_dir_all(T::config_directory())
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;

                let toml_content = toml::to_string(&default_settings)
                    .map_err(|e| anyhow!("Failed to serialize default settings: {}", e))?;

                let mut file = fs::File::create(&default_path)
                    .map_err(|e| anyhow!("Failed to create config file: {}", e))?;
                file.write_all(toml_content.as_bytes())
                    .map_err(|e| anyhow!("Failed to write default config: {}", e))?;

                default_settings
            }
        }
    };

    settings.apply_cli_overrides(&cli_settings);

    Ok(settings)
}

pub fn setup_logger(
    level: Option<String>,
    filter_targets: Vec<String>,
) -> Result<(), fern::InitError> {
    let rust_log = get_log_level(level);
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}: {}",
                OffsetDateTime::now_utc().format(&Iso8601::DEFAULT).unwrap(),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .level(rust_log)
        .filter(move |metadata| {
            !filter_targets
                .iter()
                .any(|filter| metadata.target().starts_with(filter))
        })
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

pub fn get_log_level(level: Option<String>) -> LevelFilter {
    if let Some(level) = &level {
        match level.as_ref() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    } else {
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| String::from(""));
        match rust_log.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    }
}
