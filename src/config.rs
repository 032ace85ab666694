use std::env;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub media_root: PathBuf,
    pub process_type_db_path: PathBuf,
    pub auto_upload_dir: PathBuf,
    pub session_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            port: parsed("PORT", 3000)?,
            media_root: env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()).into(),
            process_type_db_path: env::var("PROCESS_TYPE_DB_PATH")
                .unwrap_or_else(|_| "output.xlsx".to_string())
                .into(),
            auto_upload_dir: env::var("AUTO_UPLOAD_DIR")
                .unwrap_or_else(|_| "auto_upload".to_string())
                .into(),
            session_hours: parsed("SESSION_HOURS", 24)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_falls_back_to_default() {
        let port: u16 = parsed("MR_TEST_UNSET_PORT_VARIABLE", 3000).unwrap();
        assert_eq!(port, 3000);
    }

    #[test]
    fn test_required_reports_missing_name() {
        let err = required("MR_TEST_UNSET_REQUIRED_VARIABLE").unwrap_err();
        assert_eq!(err.to_string(), "MR_TEST_UNSET_REQUIRED_VARIABLE must be set");
    }
}
