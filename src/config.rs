use std::env;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_STATE_PATH: &str = "user_state.json";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the backend serving `/api/next_trains` and `/api/nearby_stop`.
    pub api_url: String,
    /// JSON file holding every chat's persisted view state.
    pub state_path: String,
}

impl Config {
    /// Reads `NEXT_TRAINS_API` and `STATE_PATH`, after loading `.env` if present.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Config {
            api_url: non_empty("NEXT_TRAINS_API").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            state_path: non_empty("STATE_PATH").unwrap_or_else(|| DEFAULT_STATE_PATH.to_string()),
        }
    }
}
