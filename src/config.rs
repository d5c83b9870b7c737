use crate::credentials::Credentials;
use log::warn;
use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "streamfront=debug,actix_web=info";

const MIN_COOKIE_KEY_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    /// `None` runs on a temporary database that is dropped on exit.
    pub db_path: Option<PathBuf>,
    pub credentials: Credentials,
    pub cookie_key: Vec<u8>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind_addr: "127.0.0.1:8080".to_owned(),
            db_path: None,
            credentials: Credentials::Plain,
            cookie_key: vec![0u8; MIN_COOKIE_KEY_LEN],
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F: Fn(&str) -> Option<String>>(var: F) -> Self {
        let mut settings = Settings::default();

        if let Some(v) = var("STREAMFRONT_BIND") {
            settings.bind_addr = v;
        }
        if let Some(v) = var("STREAMFRONT_DB_PATH").filter(|v| !v.trim().is_empty()) {
            settings.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("STREAMFRONT_CREDENTIALS") {
            match Credentials::parse(&v) {
                Some(credentials) => settings.credentials = credentials,
                None => warn!("Unknown credential policy {:?}, using plain", v),
            }
        }
        match var("STREAMFRONT_COOKIE_KEY") {
            Some(v) if v.len() >= MIN_COOKIE_KEY_LEN => settings.cookie_key = v.into_bytes(),
            Some(_) => warn!(
                "STREAMFRONT_COOKIE_KEY needs at least {} bytes, using the development key",
                MIN_COOKIE_KEY_LEN
            ),
            None => warn!("STREAMFRONT_COOKIE_KEY not set, using the development key"),
        }

        settings
    }

    pub fn open_db(&self) -> sled::Result<sled::Db> {
        match &self.db_path {
            Some(path) => sled::Config::new().path(path).open(),
            None => sled::Config::new().temporary(true).open(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Settings::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let settings = settings(&[]);
        assert_eq!(settings.bind_addr, "127.0.0.1:8080");
        assert_eq!(settings.db_path, None);
        assert_eq!(settings.credentials, Credentials::Plain);
        assert_eq!(settings.cookie_key.len(), 32);
    }

    #[test]
    fn overrides() {
        let key = "k".repeat(40);
        let settings = settings(&[
            ("STREAMFRONT_BIND", "0.0.0.0:9000"),
            ("STREAMFRONT_DB_PATH", "/tmp/streamfront"),
            ("STREAMFRONT_CREDENTIALS", "bcrypt"),
            ("STREAMFRONT_COOKIE_KEY", key.as_str()),
        ]);
        assert_eq!(settings.bind_addr, "0.0.0.0:9000");
        assert_eq!(settings.db_path, Some(PathBuf::from("/tmp/streamfront")));
        assert_eq!(settings.credentials, Credentials::bcrypt());
        assert_eq!(settings.cookie_key, key.into_bytes());
    }

    #[test]
    fn invalid_values_fall_back() {
        let settings = settings(&[
            ("STREAMFRONT_DB_PATH", "  "),
            ("STREAMFRONT_CREDENTIALS", "rot13"),
            ("STREAMFRONT_COOKIE_KEY", "short"),
        ]);
        assert_eq!(settings.db_path, None);
        assert_eq!(settings.credentials, Credentials::Plain);
        assert_eq!(settings.cookie_key, vec![0u8; 32]);
    }

    #[test]
    fn temporary_db() {
        let db = settings(&[]).open_db().unwrap();
        assert!(!db.was_recovered());
    }
}
