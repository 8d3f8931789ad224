use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "sync.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub api_base_url: String,
    pub page_limit: u32,
    pub toggle_debounce_ms: u64,
    pub prefetch_threshold: usize,
    pub send_code_retry_delay_ms: u64,
    pub notice_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080/api".into(),
            page_limit: 20,
            toggle_debounce_ms: 1000,
            prefetch_threshold: 5,
            send_code_retry_delay_ms: 5000,
            notice_capacity: 64,
        }
    }
}

impl SyncSettings {
    pub fn toggle_debounce(&self) -> Duration {
        Duration::from_millis(self.toggle_debounce_ms)
    }

    pub fn send_code_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_code_retry_delay_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    api_base_url: Option<String>,
    page_limit: Option<u32>,
    toggle_debounce_ms: Option<u64>,
    prefetch_threshold: Option<usize>,
    send_code_retry_delay_ms: Option<u64>,
    notice_capacity: Option<usize>,
}

/// Defaults, then `sync.toml` in the working directory, then `APP__*` env vars.
pub fn load_settings() -> anyhow::Result<SyncSettings> {
    let mut settings = SyncSettings::default();
    if Path::new(DEFAULT_SETTINGS_FILE).exists() {
        apply_file(&mut settings, Path::new(DEFAULT_SETTINGS_FILE))?;
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<SyncSettings> {
    let mut settings = SyncSettings::default();
    apply_file(&mut settings, path)?;
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut SyncSettings, path: &Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let file: SettingsFile = toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;

    if let Some(v) = file.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file.page_limit {
        settings.page_limit = v;
    }
    if let Some(v) = file.toggle_debounce_ms {
        settings.toggle_debounce_ms = v;
    }
    if let Some(v) = file.prefetch_threshold {
        settings.prefetch_threshold = v;
    }
    if let Some(v) = file.send_code_retry_delay_ms {
        settings.send_code_retry_delay_ms = v;
    }
    if let Some(v) = file.notice_capacity {
        settings.notice_capacity = v;
    }
    Ok(())
}

fn apply_env(settings: &mut SyncSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = parse_env(&var, "APP__PAGE_LIMIT") {
        settings.page_limit = v;
    }
    if let Some(v) = parse_env(&var, "APP__TOGGLE_DEBOUNCE_MS") {
        settings.toggle_debounce_ms = v;
    }
    if let Some(v) = parse_env(&var, "APP__PREFETCH_THRESHOLD") {
        settings.prefetch_threshold = v;
    }
    if let Some(v) = parse_env(&var, "APP__SEND_CODE_RETRY_DELAY_MS") {
        settings.send_code_retry_delay_ms = v;
    }
    if let Some(v) = parse_env(&var, "APP__NOTICE_CAPACITY") {
        settings.notice_capacity = v;
    }
}

fn parse_env<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "config: ignoring unparseable override");
            None
        }
    }
}
