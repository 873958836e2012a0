use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use engine::EngineSettings;
use serde::Deserialize;
use shared::domain::Mode;

const DEFAULT_CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub template_dir: PathBuf,
    pub menu_file: PathBuf,
    pub mode: Mode,
    pub max_body_bytes: usize,
    pub session_cookie: String,
    /// Sessions untouched for this many seconds are dropped.
    pub session_idle_secs: u64,
    /// Prefix the application is mounted under, prepended to redirects.
    pub context_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            template_dir: PathBuf::from("crates/server/templates"),
            menu_file: PathBuf::from("crates/server/menu.toml"),
            mode: Mode::Development,
            max_body_bytes: 4 * 1024 * 1024,
            session_cookie: "SESSION".into(),
            session_idle_secs: 30 * 60,
            context_path: String::new(),
        }
    }
}

impl Settings {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            mode: self.mode,
            ..EngineSettings::default()
        }
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    template_dir: Option<PathBuf>,
    menu_file: Option<PathBuf>,
    mode: Option<String>,
    max_body_bytes: Option<usize>,
    session_cookie: Option<String>,
    session_idle_secs: Option<u64>,
    context_path: Option<String>,
}

/// Defaults, then `server.toml` (or `explicit`), then environment.
pub fn load_settings(explicit: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match explicit {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            apply_file(&mut settings, &raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
        }
        None => {
            if let Ok(raw) = fs::read_to_string(DEFAULT_CONFIG_FILE) {
                apply_file(&mut settings, &raw).context("invalid server.toml")?;
            }
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

pub(crate) fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.template_dir {
        settings.template_dir = v;
    }
    if let Some(v) = file_cfg.menu_file {
        settings.menu_file = v;
    }
    if let Some(v) = file_cfg.mode {
        settings.mode = v.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(v) = file_cfg.max_body_bytes {
        settings.max_body_bytes = v;
    }
    if let Some(v) = file_cfg.session_cookie {
        settings.session_cookie = v;
    }
    if let Some(v) = file_cfg.session_idle_secs {
        settings.session_idle_secs = v;
    }
    if let Some(v) = file_cfg.context_path {
        settings.context_path = v;
    }
    Ok(())
}

pub(crate) fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = lookup("APP__TEMPLATE_DIR") {
        settings.template_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("APP__MENU_FILE") {
        settings.menu_file = PathBuf::from(v);
    }

    if let Some(v) = lookup("APP__MODE") {
        settings.mode = v.parse().map_err(anyhow::Error::msg)?;
    }

    if let Some(v) = lookup("APP__MAX_BODY_BYTES") {
        settings.max_body_bytes = v
            .parse()
            .with_context(|| format!("APP__MAX_BODY_BYTES is not a size: '{v}'"))?;
    }
    if let Some(v) = lookup("APP__SESSION_IDLE_SECS") {
        settings.session_idle_secs = v
            .parse()
            .with_context(|| format!("APP__SESSION_IDLE_SECS is not a number: '{v}'"))?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
