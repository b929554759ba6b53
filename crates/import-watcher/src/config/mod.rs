use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::watch::scanner::ScanPolicy;
use crate::watch::stall::PollSettings;

/// Dotenv file read when no explicit `--env-file` is given.
pub const DEFAULT_ENV_FILE: &str = "watcher.env";

const DEFAULT_IMPORT_FOLDER: &str = "Import";
const DEFAULT_PIPELINE_LABEL: &str = "AQNET Import";
const DEFAULT_EXTENSION: &str = "dcm";

/// Top-level configuration for a single watcher run.
///
/// Built once at startup and handed to each component by reference; nothing
/// below this struct reads the process environment.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub paths: ImportPaths,
    pub service_name: String,
    pub node_name: String,
    pub pipeline_label: String,
    pub pending_extension: String,
    pub scan: ScanConfig,
    pub mail: MailConfig,
    pub memes: MemeConfig,
    pub telemetry: TelemetryConfig,
}

impl WatcherConfig {
    /// Reads the dotenv file (explicit path, or `watcher.env` when present)
    /// and then resolves settings from the process environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|source| ConfigError::EnvFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
            None => {
                dotenvy::from_filename(DEFAULT_ENV_FILE).ok();
            }
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves settings through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let root = get("ROOT_FOLDER")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingVar("ROOT_FOLDER"))?;
        let import_name = get("IMPORT_FOLDER").unwrap_or_else(|| DEFAULT_IMPORT_FOLDER.to_string());
        let old_name = get("OLD_FOLDER").unwrap_or_else(|| format!("{import_name}_old"));

        let service_name = get("SERVICE_NAME").ok_or(ConfigError::MissingVar("SERVICE_NAME"))?;
        let node_name = get("NODE_NAME")
            .or_else(|| get("COMPUTERNAME"))
            .or_else(|| get("HOSTNAME"))
            .unwrap_or_else(|| "unknown-node".to_string());

        let policy = match get("SCAN_POLICY") {
            Some(raw) => raw.parse::<ScanPolicy>()?,
            None => ScanPolicy::default(),
        };
        let explicit_timeout = match get("POLL_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_number::<u64>(
                "POLL_TIMEOUT_SECS",
                &raw,
            )?)),
            None => None,
        };
        let timeout = explicit_timeout.unwrap_or_else(|| policy.default_timeout());
        let interval = match get("POLL_INTERVAL_SECS") {
            Some(raw) => match parse_number::<u64>("POLL_INTERVAL_SECS", &raw)? {
                0 => {
                    return Err(ConfigError::InvalidNumber {
                        key: "POLL_INTERVAL_SECS",
                        value: raw,
                    })
                }
                secs => Duration::from_secs(secs),
            },
            None => Duration::from_secs(1),
        };

        let port = match get("SMTP_PORT") {
            Some(raw) => parse_number::<u16>("SMTP_PORT", &raw)?,
            None => 25,
        };
        let recipients = get("SMTP_RECIPIENTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|address| !address.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let meme_dir = get("MEME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("memes"));
        let success_template = get("SUCCESSFUL_RESTART_MEME").map(|name| meme_dir.join(name));
        let failure_template = get("UNSUCCESSFUL_RESTART_MEME").map(|name| meme_dir.join(name));

        Ok(Self {
            paths: ImportPaths {
                import_dir: root.join(import_name),
                old_dir: root.join(old_name),
                root,
            },
            service_name,
            node_name,
            pipeline_label: get("PIPELINE_LABEL")
                .unwrap_or_else(|| DEFAULT_PIPELINE_LABEL.to_string()),
            pending_extension: get("PENDING_EXTENSION")
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
            scan: ScanConfig {
                policy,
                poll: PollSettings { timeout, interval },
                timeout_configured: explicit_timeout.is_some(),
            },
            mail: MailConfig {
                server: get("SMTP_SERVER"),
                port,
                username: get("SMTP_USERNAME"),
                password: get("SMTP_PASSWORD"),
                starttls: get("SMTP_STARTTLS").is_some_and(|raw| parse_flag(&raw)),
                from_domain: get("SMTP_FROM_DOMAIN").unwrap_or_else(|| "localhost".to_string()),
                recipients,
            },
            memes: MemeConfig {
                success_template,
                failure_template,
            },
            telemetry: TelemetryConfig {
                log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                log_file: get("LOG_FILE").map(PathBuf::from),
            },
        })
    }
}

/// Folder layout under the configured root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPaths {
    pub root: PathBuf,
    pub import_dir: PathBuf,
    pub old_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub policy: ScanPolicy,
    pub poll: PollSettings,
    /// Whether the poll budget came from `POLL_TIMEOUT_SECS` rather than the
    /// policy default.
    pub timeout_configured: bool,
}

impl ScanConfig {
    /// Switches policy. The budget follows the new policy's default unless
    /// one was configured explicitly.
    pub fn apply_policy(&mut self, policy: ScanPolicy) {
        self.policy = policy;
        if !self.timeout_configured {
            self.poll.timeout = policy.default_timeout();
        }
    }

    /// Sets an explicit poll budget that later policy changes keep.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.poll.timeout = timeout;
        self.timeout_configured = true;
    }
}

/// SMTP endpoint and recipients for alert mail.
#[derive(Clone)]
pub struct MailConfig {
    pub server: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub starttls: bool,
    pub from_domain: String,
    pub recipients: Vec<String>,
}

impl MailConfig {
    pub fn sender(&self, node_name: &str) -> String {
        format!("{node_name}@{}", self.from_domain)
    }
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("starttls", &self.starttls)
            .field("from_domain", &self.from_domain)
            .field("recipients", &self.recipients)
            .finish()
    }
}

/// Template images used for the alert graphic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemeConfig {
    pub success_template: Option<PathBuf>,
    pub failure_template: Option<PathBuf>,
}

/// Tracing controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVar(&'static str),
    InvalidNumber { key: &'static str, value: String },
    InvalidPolicy(String),
    EnvFile { path: PathBuf, source: dotenvy::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingVar(key) => write!(f, "{key} is not set"),
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer, got '{value}'")
            }
            ConfigError::InvalidPolicy(value) => write!(
                f,
                "SCAN_POLICY must be 'exhaustive' or 'single-oldest' (case-insensitive, '_' may replace '-'), got '{value}'"
            ),
            ConfigError::EnvFile { path, .. } => {
                write!(f, "unable to read env file {}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::EnvFile { source, .. } => Some(source),
            ConfigError::MissingVar(_)
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidPolicy(_) => None,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![("ROOT_FOLDER", "/data/cache"), ("SERVICE_NAME", "ImportSvc")]
    }

    #[test]
    fn defaults_apply_when_optional_keys_missing() {
        let config = WatcherConfig::from_lookup(lookup(&minimal())).expect("config loads");
        assert_eq!(config.paths.import_dir, PathBuf::from("/data/cache/Import"));
        assert_eq!(config.paths.old_dir, PathBuf::from("/data/cache/Import_old"));
        assert_eq!(config.scan.policy, ScanPolicy::Exhaustive);
        assert_eq!(config.scan.poll.timeout, Duration::from_secs(60));
        assert_eq!(config.scan.poll.interval, Duration::from_secs(1));
        assert_eq!(config.pending_extension, "dcm");
        assert_eq!(config.mail.port, 25);
        assert!(config.mail.recipients.is_empty());
        assert_eq!(config.node_name, "unknown-node");
        assert_eq!(config.telemetry, TelemetryConfig::default());
    }

    #[test]
    fn missing_root_is_reported() {
        let err = WatcherConfig::from_lookup(lookup(&[("SERVICE_NAME", "svc")]))
            .expect_err("root required");
        assert!(matches!(err, ConfigError::MissingVar("ROOT_FOLDER")));
    }

    #[test]
    fn blank_root_counts_as_missing() {
        let err = WatcherConfig::from_lookup(lookup(&[
            ("ROOT_FOLDER", "   "),
            ("SERVICE_NAME", "svc"),
        ]))
        .expect_err("blank root rejected");
        assert!(matches!(err, ConfigError::MissingVar("ROOT_FOLDER")));
    }

    #[test]
    fn single_oldest_policy_uses_shorter_budget() {
        let mut pairs = minimal();
        pairs.push(("SCAN_POLICY", "single-oldest"));
        let config = WatcherConfig::from_lookup(lookup(&pairs)).expect("config loads");
        assert_eq!(config.scan.policy, ScanPolicy::SingleOldest);
        assert_eq!(config.scan.poll.timeout, Duration::from_secs(30));
    }

    #[test]
    fn policy_override_keeps_configured_timeout() {
        let mut pairs = minimal();
        pairs.push(("POLL_TIMEOUT_SECS", "90"));
        let mut config = WatcherConfig::from_lookup(lookup(&pairs)).expect("config loads");
        assert!(config.scan.timeout_configured);

        config.scan.apply_policy(ScanPolicy::SingleOldest);

        assert_eq!(config.scan.policy, ScanPolicy::SingleOldest);
        assert_eq!(config.scan.poll.timeout, Duration::from_secs(90));
    }

    #[test]
    fn policy_override_follows_default_budget_when_unset() {
        let mut config = WatcherConfig::from_lookup(lookup(&minimal())).expect("config loads");
        assert!(!config.scan.timeout_configured);

        config.scan.apply_policy(ScanPolicy::SingleOldest);
        assert_eq!(config.scan.poll.timeout, Duration::from_secs(30));

        config.scan.set_timeout(Duration::from_secs(5));
        config.scan.apply_policy(ScanPolicy::Exhaustive);
        assert_eq!(config.scan.poll.timeout, Duration::from_secs(5));
    }

    #[test]
    fn recipients_are_split_and_trimmed() {
        let mut pairs = minimal();
        pairs.push(("SMTP_RECIPIENTS", "ops@example.org, pacs@example.org,,"));
        pairs.push(("SMTP_FROM_DOMAIN", "example.org"));
        pairs.push(("NODE_NAME", "PACS01"));
        let config = WatcherConfig::from_lookup(lookup(&pairs)).expect("config loads");
        assert_eq!(
            config.mail.recipients,
            vec!["ops@example.org".to_string(), "pacs@example.org".to_string()]
        );
        assert_eq!(config.mail.sender(&config.node_name), "PACS01@example.org");
    }

    #[test]
    fn meme_templates_resolve_under_meme_dir() {
        let mut pairs = minimal();
        pairs.push(("MEME_DIR", "/opt/memes"));
        pairs.push(("SUCCESSFUL_RESTART_MEME", "fixed.jpg"));
        let config = WatcherConfig::from_lookup(lookup(&pairs)).expect("config loads");
        assert_eq!(
            config.memes.success_template,
            Some(PathBuf::from("/opt/memes/fixed.jpg"))
        );
        assert_eq!(config.memes.failure_template, None);
    }

    #[test]
    fn rejects_bad_numbers_and_policies() {
        let mut pairs = minimal();
        pairs.push(("SMTP_PORT", "seventy"));
        assert!(matches!(
            WatcherConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::InvalidNumber { key: "SMTP_PORT", .. })
        ));

        let mut pairs = minimal();
        pairs.push(("POLL_INTERVAL_SECS", "0"));
        assert!(matches!(
            WatcherConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::InvalidNumber {
                key: "POLL_INTERVAL_SECS",
                ..
            })
        ));

        let mut pairs = minimal();
        pairs.push(("SCAN_POLICY", "random"));
        assert!(matches!(
            WatcherConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn debug_output_redacts_password() {
        let mut pairs = minimal();
        pairs.push(("SMTP_PASSWORD", "hunter2"));
        let config = WatcherConfig::from_lookup(lookup(&pairs)).expect("config loads");
        let rendered = format!("{:?}", config.mail);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn load_reads_process_environment() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        env::set_var("ROOT_FOLDER", "/srv/cache");
        env::set_var("SERVICE_NAME", "ImportSvc");
        env::set_var("NODE_NAME", "NODE-7");
        let config = WatcherConfig::load(None).expect("config loads from env");
        env::remove_var("ROOT_FOLDER");
        env::remove_var("SERVICE_NAME");
        env::remove_var("NODE_NAME");

        assert_eq!(config.paths.root, PathBuf::from("/srv/cache"));
        assert_eq!(config.node_name, "NODE-7");
    }

    #[test]
    fn explicit_missing_env_file_is_fatal() {
        let err = WatcherConfig::load(Some(Path::new("/nonexistent/watcher.env")))
            .expect_err("missing env file rejected");
        assert!(matches!(err, ConfigError::EnvFile { .. }));
    }
}
