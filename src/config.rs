use crate::service::{self, ServiceDescriptor};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "netlure: lightweight async network deception daemon")]
pub struct Cli {
    /// Path to config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend URL to POST attack events to (overrides config)
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Backend bearer token for authenticated POSTs
    #[arg(long)]
    pub backend_token: Option<String>,

    /// Directory for pending event batches and other state
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Run recovery: resend any pending batch files and exit
    #[arg(long)]
    pub resend_pending: bool,

    /// List configured services (after config expansion) and exit
    #[arg(long)]
    pub list_services: bool,

    /// Management API bind address (host:port). If unset, disabled.
    #[arg(long)]
    pub admin_addr: Option<String>,

    /// Log format: text or json (default text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct FileConfig {
    pub listen_addr: Option<String>,
    pub services: Option<Vec<ServiceDescriptor>>,
    pub backend_url: Option<String>,
    pub backend_token: Option<String>,
    pub data_dir: Option<String>,
    pub report_interval_seconds: Option<u64>,
    pub max_pending_files: Option<usize>,
    pub idle_timeout_seconds: Option<u64>,
    pub session_max_seconds: Option<u64>,
    pub max_sessions_per_service: Option<usize>,
    pub max_input_bytes: Option<usize>,
    pub max_login_attempts: Option<u32>,
    pub max_amplification_ratio: Option<u32>,
    pub event_buffer_capacity: Option<usize>,
    pub admin_addr: Option<String>,
    pub admin_window_seconds: Option<u64>,
    pub admin_max_requests: Option<u32>,
    pub admin_ban_seconds: Option<u64>,
    pub admin_whitelist: Option<Vec<IpAddr>>,
    pub external_scorer_timeout_ms: Option<u64>,
    pub log_format: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    pub services: Vec<ServiceDescriptor>,
    pub backend_url: Option<String>,
    pub backend_token: Option<String>,
    pub data_dir: PathBuf,
    pub report_interval_seconds: u64,
    pub max_pending_files: usize,
    pub idle_timeout_seconds: u64,
    pub session_max_seconds: u64,
    pub max_sessions_per_service: usize,
    pub max_input_bytes: usize,
    pub max_login_attempts: u32,
    pub max_amplification_ratio: u32,
    pub event_buffer_capacity: usize,
    pub admin_addr: Option<String>,
    pub admin_window_seconds: u64,
    pub admin_max_requests: u32,
    pub admin_ban_seconds: u64,
    pub admin_whitelist: Vec<IpAddr>,
    pub external_scorer_timeout_ms: u64,
    pub log_format: String,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        // Load file config: explicit --config, otherwise auto-detect ./config.toml
        let file_cfg: Option<FileConfig> = if let Some(path) = &cli.config {
            let s = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Some(toml::from_str(&s).with_context(|| "parsing config file")?)
        } else {
            let default_path = PathBuf::from("./config.toml");
            if default_path.exists() {
                let s = fs::read_to_string(&default_path)
                    .with_context(|| format!("reading config {}", default_path.display()))?;
                Some(toml::from_str(&s).with_context(|| "parsing config file")?)
            } else {
                // First run experience: create a default config.toml
                let template = r#"# netlure configuration
listen_addr = "0.0.0.0"
# No remote backend by default
backend_url = ""
report_interval_seconds = 30
max_pending_files = 100
admin_addr = "127.0.0.1:9100"
log_format = "text"

# Services default to all emulated protocols on their standard ports.
# Override like so:
# [[services]]
# protocol = "ssh"
# port = 2222
#
# [[services]]
# protocol = "dns"
# transport = "udp"
# port = 5353
"#;
                let _ = fs::write(&default_path, template);
                None
            }
        };

        let backend_url = cli
            .backend_url
            .clone()
            .or_else(|| file_cfg.as_ref().and_then(|f| f.backend_url.clone()))
            .filter(|u| !u.is_empty());

        let backend_token = cli
            .backend_token
            .clone()
            .or_else(|| file_cfg.as_ref().and_then(|f| f.backend_token.clone()));

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| file_cfg.as_ref().and_then(|f| f.data_dir.clone().map(PathBuf::from)))
            .unwrap_or_else(|| PathBuf::from("./netlure_state"));

        let listen_addr = file_cfg
            .as_ref()
            .and_then(|f| f.listen_addr.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let services = file_cfg
            .as_ref()
            .and_then(|f| f.services.clone())
            .unwrap_or_else(service::default_descriptors);

        // Fail fast on a bad registry rather than at bind time.
        service::resolve(&services).context("validating service registry")?;

        let admin_addr = cli
            .admin_addr
            .clone()
            .or_else(|| file_cfg.as_ref().and_then(|f| f.admin_addr.clone()));

        let log_format = cli
            .log_format
            .clone()
            .or_else(|| file_cfg.as_ref().and_then(|f| f.log_format.clone()))
            .unwrap_or_else(|| "text".to_string());

        let f = file_cfg.unwrap_or_default();
        Ok(Config {
            listen_addr,
            services,
            backend_url,
            backend_token,
            data_dir,
            report_interval_seconds: f.report_interval_seconds.unwrap_or(30),
            max_pending_files: f.max_pending_files.unwrap_or(100),
            idle_timeout_seconds: f.idle_timeout_seconds.unwrap_or(10),
            session_max_seconds: f.session_max_seconds.unwrap_or(120),
            max_sessions_per_service: f.max_sessions_per_service.unwrap_or(64),
            max_input_bytes: f.max_input_bytes.unwrap_or(4096),
            max_login_attempts: f.max_login_attempts.unwrap_or(6),
            max_amplification_ratio: f.max_amplification_ratio.unwrap_or(3),
            event_buffer_capacity: f.event_buffer_capacity.unwrap_or(1024),
            admin_addr,
            admin_window_seconds: f.admin_window_seconds.unwrap_or(60),
            admin_max_requests: f.admin_max_requests.unwrap_or(30),
            admin_ban_seconds: f.admin_ban_seconds.unwrap_or(600),
            admin_whitelist: f.admin_whitelist.unwrap_or_default(),
            external_scorer_timeout_ms: f.external_scorer_timeout_ms.unwrap_or(250),
            log_format,
        })
    }
}

// Internal convenience builder (exposed for integration tests)
impl Config {
    pub fn test_builder() -> TestConfigBuilder {
        TestConfigBuilder::default()
    }
}

#[derive(Default)]
#[doc(hidden)]
pub struct TestConfigBuilder {
    listen_addr: Option<String>,
    services: Option<Vec<ServiceDescriptor>>,
    backend_url: Option<String>,
    backend_token: Option<String>,
    data_dir: Option<PathBuf>,
    report_interval_seconds: Option<u64>,
    max_pending_files: Option<usize>,
    idle_timeout_seconds: Option<u64>,
    session_max_seconds: Option<u64>,
    max_sessions_per_service: Option<usize>,
    max_input_bytes: Option<usize>,
    max_login_attempts: Option<u32>,
    max_amplification_ratio: Option<u32>,
    event_buffer_capacity: Option<usize>,
    admin_addr: Option<String>,
    admin_window_seconds: Option<u64>,
    admin_max_requests: Option<u32>,
    admin_ban_seconds: Option<u64>,
    admin_whitelist: Option<Vec<IpAddr>>,
    external_scorer_timeout_ms: Option<u64>,
    log_format: Option<String>,
}

impl TestConfigBuilder {
    pub fn listen_addr<S: Into<String>>(mut self, s: S) -> Self {
        self.listen_addr = Some(s.into());
        self
    }
    pub fn services(mut self, v: Vec<ServiceDescriptor>) -> Self {
        self.services = Some(v);
        self
    }
    pub fn backend_url(mut self, v: Option<String>) -> Self {
        self.backend_url = v;
        self
    }
    pub fn backend_token(mut self, v: Option<String>) -> Self {
        self.backend_token = v;
        self
    }
    pub fn data_dir<P: Into<PathBuf>>(mut self, p: P) -> Self {
        self.data_dir = Some(p.into());
        self
    }
    pub fn report_interval_seconds(mut self, v: u64) -> Self {
        self.report_interval_seconds = Some(v);
        self
    }
    pub fn max_pending_files(mut self, v: usize) -> Self {
        self.max_pending_files = Some(v);
        self
    }
    pub fn idle_timeout_seconds(mut self, v: u64) -> Self {
        self.idle_timeout_seconds = Some(v);
        self
    }
    pub fn session_max_seconds(mut self, v: u64) -> Self {
        self.session_max_seconds = Some(v);
        self
    }
    pub fn max_sessions_per_service(mut self, v: usize) -> Self {
        self.max_sessions_per_service = Some(v);
        self
    }
    pub fn max_input_bytes(mut self, v: usize) -> Self {
        self.max_input_bytes = Some(v);
        self
    }
    pub fn max_login_attempts(mut self, v: u32) -> Self {
        self.max_login_attempts = Some(v);
        self
    }
    pub fn max_amplification_ratio(mut self, v: u32) -> Self {
        self.max_amplification_ratio = Some(v);
        self
    }
    pub fn event_buffer_capacity(mut self, v: usize) -> Self {
        self.event_buffer_capacity = Some(v);
        self
    }
    pub fn admin_addr<S: Into<String>>(mut self, s: S) -> Self {
        self.admin_addr = Some(s.into());
        self
    }
    pub fn admin_window_seconds(mut self, v: u64) -> Self {
        self.admin_window_seconds = Some(v);
        self
    }
    pub fn admin_max_requests(mut self, v: u32) -> Self {
        self.admin_max_requests = Some(v);
        self
    }
    pub fn admin_ban_seconds(mut self, v: u64) -> Self {
        self.admin_ban_seconds = Some(v);
        self
    }
    pub fn admin_whitelist(mut self, v: Vec<IpAddr>) -> Self {
        self.admin_whitelist = Some(v);
        self
    }
    pub fn external_scorer_timeout_ms(mut self, v: u64) -> Self {
        self.external_scorer_timeout_ms = Some(v);
        self
    }
    pub fn log_format<S: Into<String>>(mut self, s: S) -> Self {
        self.log_format = Some(s.into());
        self
    }
    pub fn build(self) -> Config {
        Config {
            listen_addr: self.listen_addr.unwrap_or_else(|| "127.0.0.1".into()),
            services: self.services.unwrap_or_else(crate::service::default_descriptors),
            backend_url: self.backend_url,
            backend_token: self.backend_token,
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from("./netlure_state")),
            report_interval_seconds: self.report_interval_seconds.unwrap_or(30),
            max_pending_files: self.max_pending_files.unwrap_or(100),
            idle_timeout_seconds: self.idle_timeout_seconds.unwrap_or(10),
            session_max_seconds: self.session_max_seconds.unwrap_or(120),
            max_sessions_per_service: self.max_sessions_per_service.unwrap_or(64),
            max_input_bytes: self.max_input_bytes.unwrap_or(4096),
            max_login_attempts: self.max_login_attempts.unwrap_or(6),
            max_amplification_ratio: self.max_amplification_ratio.unwrap_or(3),
            event_buffer_capacity: self.event_buffer_capacity.unwrap_or(1024),
            admin_addr: self.admin_addr,
            admin_window_seconds: self.admin_window_seconds.unwrap_or(60),
            admin_max_requests: self.admin_max_requests.unwrap_or(30),
            admin_ban_seconds: self.admin_ban_seconds.unwrap_or(600),
            admin_whitelist: self.admin_whitelist.unwrap_or_default(),
            external_scorer_timeout_ms: self.external_scorer_timeout_ms.unwrap_or(250),
            log_format: self.log_format.unwrap_or_else(|| "text".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(config: Option<PathBuf>, backend_url: Option<String>) -> Cli {
        Cli {
            config,
            backend_url,
            backend_token: None,
            data_dir: None,
            resend_pending: false,
            list_services: false,
            admin_addr: None,
            log_format: None,
        }
    }

    #[test]
    fn file_values_apply_and_cli_overrides() {
        let path = std::env::temp_dir().join("netlure_cfg_layering.toml");
        std::fs::write(
            &path,
            "backend_url = \"http://file.example/\"\nreport_interval_seconds = 5\n\n[[services]]\nprotocol = \"ssh\"\nport = 2222\n",
        )
        .unwrap();
        let cli = cli_with(Some(path.clone()), Some("http://cli.example/".into()));
        let cfg = Config::from_cli(&cli).unwrap();
        assert_eq!(cfg.backend_url.as_deref(), Some("http://cli.example/"));
        assert_eq!(cfg.report_interval_seconds, 5);
        assert_eq!(cfg.services.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_backend_url_reads_as_unset() {
        let path = std::env::temp_dir().join("netlure_cfg_empty_url.toml");
        std::fs::write(&path, "backend_url = \"\"\n").unwrap();
        let cli = cli_with(Some(path.clone()), None);
        let cfg = Config::from_cli(&cli).unwrap();
        assert!(cfg.backend_url.is_none());
        let _ = std::fs::remove_file(&path);
    }
}
