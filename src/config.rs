//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) y arma los límites del runtime más la
//! sección opcional de base de datos.
use std::env;
use std::time::Duration;

use once_cell::sync::Lazy;

use policy_core::constants::{DEFAULT_BLOCK_TIMEOUT_MS, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_STORE_RETRIES};
use policy_core::RuntimeOptions;
use policy_persistence::DbConfig;

use crate::errors::AppError;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

pub const BLOCK_TIMEOUT_VAR: &str = "POLICYFLOW_BLOCK_TIMEOUT_MS";
pub const LOCK_TIMEOUT_VAR: &str = "POLICYFLOW_LOCK_TIMEOUT_MS";
pub const STORE_RETRIES_VAR: &str = "POLICYFLOW_STORE_RETRIES";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub runtime: RuntimeOptions,
    /// `None` => stores en memoria.
    pub database: Option<DbConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Lazy::force(&DOTENV_LOADED);
        let mut cfg = Self::from_lookup(|k| env::var(k).ok())?;
        if env::var("DATABASE_URL").is_ok() {
            cfg.database = Some(DbConfig::from_env()?);
        }
        Ok(cfg)
    }

    /// Sólo la sección de runtime, a partir de un lookup arbitrario.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
        where F: Fn(&str) -> Option<String>
    {
        let block_ms = parse_var(&lookup, BLOCK_TIMEOUT_VAR)?.unwrap_or(DEFAULT_BLOCK_TIMEOUT_MS);
        let lock_ms = parse_var(&lookup, LOCK_TIMEOUT_VAR)?.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS);
        let retries = parse_var(&lookup, STORE_RETRIES_VAR)?.map(|r| r as u32).unwrap_or(DEFAULT_STORE_RETRIES);
        if block_ms == 0 || lock_ms == 0 {
            return Err(AppError::Config("timeouts must be greater than zero".into()));
        }
        Ok(Self { runtime: RuntimeOptions { block_timeout: Duration::from_millis(block_ms),
                                            lock_timeout: Duration::from_millis(lock_ms),
                                            store_retries: retries },
                  database: None })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { runtime: RuntimeOptions::default(),
               database: None }
    }
}

fn parse_var<F>(lookup: &F, name: &str) -> Result<Option<u64>, AppError>
    where F: Fn(&str) -> Option<String>
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim()
                        .parse::<u64>()
                        .map(Some)
                        .map_err(|_| AppError::Config(format!("{name}: expected an integer, got '{raw}'"))),
    }
}
