use crate::error::AppError;
use crate::sniper::types::{SniperArgs, SniperConfig};
use std::path::{Path, PathBuf};

const CONFIG_PATH_ENV: &str = "TRADE_SNIPER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "sniper.json";
const SESSION_ENV: &str = "POESESSID";

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn resolve_config_path() -> PathBuf {
    env_value(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Parses a JSON config. `fallback_session` fills the credential only when the file omits it.
pub fn parse_config(
    payload: &mut [u8],
    fallback_session: Option<String>,
) -> Result<SniperConfig, AppError> {
    let mut args: SniperArgs = simd_json::serde::from_slice(payload)?;
    let has_session = args
        .poesessid
        .as_deref()
        .is_some_and(|session| !session.trim().is_empty());
    if !has_session {
        args.poesessid = fallback_session;
    }
    args.normalize()
}

pub fn load_config_from(path: &Path) -> Result<SniperConfig, AppError> {
    let mut payload = std::fs::read(path).map_err(|error| {
        AppError::InvalidArgument(format!("cannot read config {}: {error}", path.display()))
    })?;
    parse_config(&mut payload, env_value(SESSION_ENV))
}

pub fn load_config() -> Result<SniperConfig, AppError> {
    load_config_from(&resolve_config_path())
}
