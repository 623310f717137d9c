//! Run configuration.
//!
//! Defaults describe the portal as last observed. Everything that identifies
//! the target (URL, credentials, output directory, browser) can be overridden
//! from the command line or the environment; see `main.rs`.
//!
//! ## Credentials
//!
//! Resolved in order of priority:
//! 1. `--username`/`--password` or `CUSTOMS_PROBE_USERNAME`/`CUSTOMS_PROBE_PASSWORD`
//! 2. `~/.customs-probe/credentials` with `username=` and `password=` lines
//!
//! A value from (1) overrides the same key from (2).

use crate::error::ConfigError;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOGIN_URL: &str = "https://aduana.example.gob/portal/inicio";

/// Clicking this opens the login popup.
pub const DEFAULT_LOGIN_TRIGGER: &str = "a[onclick*='window.open'], button[onclick*='window.open'], \
     a[href*='login' i], a[href*='ingreso' i], #btnIngresar, #btnLogin";

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "invoice",
    "factura",
    "declaration",
    "declaración",
    "declaracion",
    "customs",
    "aduana",
    "dua",
    "submit",
    "upload",
    "nueva",
    "new",
];

const USERNAME_FALLBACKS: &[&str] = &["username", "usuario", "user", "login", "txtUsuario"];
const PASSWORD_FALLBACKS: &[&str] = &["password", "clave", "contrasena", "pass", "txtClave"];

/// Login credentials. Written once into the session and never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `~/.customs-probe/credentials`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".customs-probe")
            .join("credentials")
    }

    /// Parse a `key=value` credentials file. Blank lines and `#` comments are
    /// ignored; unknown keys are skipped.
    pub fn parse(text: &str) -> (Option<String>, Option<String>) {
        let mut username = None;
        let mut password = None;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "username" => username = Some(value),
                "password" => password = Some(value),
                _ => {}
            }
        }
        (username, password)
    }

    /// Combine explicit values with the credentials file at `file`.
    pub fn resolve(
        username: Option<String>,
        password: Option<String>,
        file: &Path,
    ) -> Result<Self, ConfigError> {
        let (mut username, mut password) = (username, password);
        if username.is_none() || password.is_none() {
            match std::fs::read_to_string(file) {
                Ok(text) => {
                    let (file_user, file_pass) = Self::parse(&text);
                    username = username.or(file_user);
                    password = password.or(file_pass);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ConfigError::CredentialsFile {
                        path: file.display().to_string(),
                        source,
                    })
                }
            }
        }
        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Ok(Self::new(u, p)),
            _ => Err(ConfigError::MissingCredentials {
                path: file.display().to_string(),
            }),
        }
    }
}

/// URL fragments that tell a successful login from a rejected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginMarkers {
    pub success: Vec<String>,
    pub error: Vec<String>,
}

impl Default for LoginMarkers {
    fn default() -> Self {
        Self {
            success: vec!["/dashboard".into(), "/principal".into()],
            error: vec!["/error".into(), "autherror".into(), "login_failed".into()],
        }
    }
}

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub login_url: String,
    pub credentials: Credentials,
    /// Root under which `run-<stamp>/` directories are created.
    pub output_dir: PathBuf,
    pub headless: bool,
    pub chromium_path: Option<PathBuf>,
    /// Record screencast frames into `videos/`.
    pub record_video: bool,
    pub markers: LoginMarkers,
    pub login_trigger: String,
    /// Selector of the login form inside the popup.
    pub login_form_selector: String,
    pub username_fallbacks: Vec<String>,
    pub password_fallbacks: Vec<String>,
    pub keywords: Vec<String>,
    /// Minimum `<body>` height for the dashboard to count as rendered.
    pub ready_min_height: u64,
    /// Interval between readiness and redirect polls.
    pub poll_interval: Duration,
    /// Randomized pointer movement and pauses before clicking.
    pub human_jitter: bool,
}

impl ProbeConfig {
    pub fn new(login_url: impl Into<String>, credentials: Credentials, output_dir: PathBuf) -> Self {
        Self {
            login_url: login_url.into(),
            credentials,
            output_dir,
            headless: true,
            chromium_path: None,
            record_video: true,
            markers: LoginMarkers::default(),
            login_trigger: DEFAULT_LOGIN_TRIGGER.to_string(),
            login_form_selector: "form".to_string(),
            username_fallbacks: USERNAME_FALLBACKS.iter().map(|s| s.to_string()).collect(),
            password_fallbacks: PASSWORD_FALLBACKS.iter().map(|s| s.to_string()).collect(),
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            ready_min_height: 100,
            poll_interval: Duration::from_millis(500),
            human_jitter: true,
        }
    }

    /// Default output root: `./evidence`.
    pub fn default_output_dir() -> PathBuf {
        PathBuf::from("evidence")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.login_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.login_url.clone(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.login_url.clone(),
                source: url::ParseError::RelativeUrlWithoutBase,
            });
        }
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(ConfigError::MissingCredentials {
                path: Credentials::default_path().display().to_string(),
            });
        }
        if self.login_trigger.trim().is_empty() {
            return Err(ConfigError::Empty("login trigger selector"));
        }
        if self.login_form_selector.trim().is_empty() {
            return Err(ConfigError::Empty("login form selector"));
        }
        if self.markers.success.is_empty() {
            return Err(ConfigError::Empty("success marker list"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Empty("poll interval"));
        }
        Ok(())
    }
}
