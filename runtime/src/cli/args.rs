//! Run arguments shared by `customs-probe` and `customs-probe doctor`.

use crate::config::{Credentials, ProbeConfig, DEFAULT_LOGIN_URL};
use crate::error::ConfigError;
use clap::{ArgAction, Args};
use std::path::PathBuf;

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Portal page that exposes the login affordance
    #[arg(long, env = "CUSTOMS_PROBE_LOGIN_URL", default_value = DEFAULT_LOGIN_URL)]
    pub login_url: String,

    /// Portal username
    #[arg(long, env = "CUSTOMS_PROBE_USERNAME")]
    pub username: Option<String>,

    /// Portal password
    #[arg(long, env = "CUSTOMS_PROBE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Credentials file with `username=` and `password=` lines
    /// [default: ~/.customs-probe/credentials]
    #[arg(long, env = "CUSTOMS_PROBE_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Directory under which run-<timestamp>/ folders are created
    #[arg(long, short, env = "CUSTOMS_PROBE_OUTPUT_DIR", default_value = "evidence")]
    pub output_dir: PathBuf,

    /// Run Chromium without a window (`--headless false` to watch)
    #[arg(long, env = "CUSTOMS_PROBE_HEADLESS", default_value_t = true, action = ArgAction::Set)]
    pub headless: bool,

    /// Chromium executable to use
    #[arg(long, env = "CUSTOMS_PROBE_CHROMIUM_PATH")]
    pub chromium_path: Option<PathBuf>,

    /// Do not record screencast frames
    #[arg(long)]
    pub no_video: bool,

    /// Click immediately, without pointer movement or pauses
    #[arg(long)]
    pub no_jitter: bool,

    /// Additional workflow keyword for discovery (repeatable)
    #[arg(long = "keyword")]
    pub keywords: Vec<String>,
}

impl RunArgs {
    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_file
            .clone()
            .unwrap_or_else(Credentials::default_path)
    }

    /// Build and validate the run configuration.
    pub fn to_config(&self) -> Result<ProbeConfig, ConfigError> {
        let credentials = Credentials::resolve(
            self.username.clone(),
            self.password.clone(),
            &self.credentials_path(),
        )?;
        let mut config = ProbeConfig::new(&self.login_url, credentials, self.output_dir.clone());
        config.headless = self.headless;
        config.chromium_path = self.chromium_path.clone();
        config.record_video = !self.no_video;
        config.human_jitter = !self.no_jitter;
        for keyword in &self.keywords {
            if !config.keywords.contains(keyword) {
                config.keywords.push(keyword.clone());
            }
        }
        config.validate()?;
        Ok(config)
    }
}
