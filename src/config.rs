use std::path::PathBuf;

/// Connection settings for the hosted backend plus the local projection path.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub profiles_table: String,
    pub session_file: PathBuf,
}

impl BackendConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("LEARNLAB_API_URL")?;
        let api_key = std::env::var("LEARNLAB_API_KEY")?;
        let profiles_table =
            std::env::var("LEARNLAB_PROFILES_TABLE").unwrap_or_else(|_| "profiles".into());
        let session_file = std::env::var("LEARNLAB_SESSION_FILE")
            .unwrap_or_else(|_| "auth-storage.json".into())
            .into();
        Ok(Self {
            base_url,
            api_key,
            profiles_table,
            session_file,
        })
    }
}
