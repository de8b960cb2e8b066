use std::{env, fmt, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, bail};
use tracing::info;

/// JWT secrets that ship in sample `.env` files and must never be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub imgbb_url: String,
    pub imgbb_api_keys: Vec<String>,
    pub upload_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("jwt_secret", &"<redacted>")
            .field("db_path", &self.db_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("imgbb_url", &self.imgbb_url)
            .field("imgbb_api_keys", &self.imgbb_api_keys.len())
            .field("upload_timeout", &self.upload_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("DEVIT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("DEVIT_JWT_SECRET is unset or still a placeholder");
        }

        let imgbb_api_keys: Vec<String> = lookup("DEVIT_IMGBB_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        if imgbb_api_keys.is_empty() {
            info!("DEVIT_IMGBB_API_KEYS not set, image uploads will be rejected");
        }

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(or_default(&lookup, "DEVIT_DB_PATH", "devit.db")),
            host: or_default(&lookup, "DEVIT_HOST", "0.0.0.0"),
            port: parse(&lookup, "DEVIT_PORT", "8000")?,
            imgbb_url: or_default(&lookup, "DEVIT_IMGBB_URL", "https://api.imgbb.com/1/upload"),
            imgbb_api_keys,
            upload_timeout: Duration::from_secs(parse(&lookup, "DEVIT_UPLOAD_TIMEOUT_SECS", "15")?),
        })
    }
}

fn or_default(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = or_default(lookup, key, default);
    raw.parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("invalid {key} value: {raw}"))
}
