//! Runtime configuration
//!
//! Read from the process environment after loading `.env`.

use crate::error::TrackerError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use tracing::warn;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "./data";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the serverless functions (without `/functions/v1`)
    pub functions_url: String,
    /// Publishable key sent as a bearer token
    pub functions_key: Option<String>,
    /// Directory holding the JSON storage files
    pub data_dir: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let functions_url = env::var("FUNCTIONS_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .map_err(|_| TrackerError::Config("FUNCTIONS_URL not set".to_string()))?;

        let functions_key = env::var("FUNCTIONS_KEY").ok().filter(|k| !k.trim().is_empty());
        if functions_key.is_none() {
            warn!("FUNCTIONS_KEY not set, requests will be sent without authorization");
        }

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw
                .parse()
                .map_err(|_| TrackerError::Config(format!("invalid port: {}", raw)))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            functions_url,
            functions_key,
            data_dir,
            port,
        })
    }
}
