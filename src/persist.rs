use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;

use crate::session::dto::SessionProjection;

/// Durable storage for the session projection. Implementations are
/// synchronous; callers treat failures as non-fatal.
pub trait ProjectionCache: Send + Sync {
    /// `None` when nothing has been stored yet.
    fn load(&self) -> anyhow::Result<Option<SessionProjection>>;
    fn save(&self, projection: &SessionProjection) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// Projection stored as JSON under a fixed path.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    path: PathBuf,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProjectionCache for JsonFileCache {
    fn load(&self) -> anyhow::Result<Option<SessionProjection>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context("read session projection"),
        };
        let projection = serde_json::from_slice(&raw).context("decode session projection")?;
        Ok(Some(projection))
    }

    fn save(&self, projection: &SessionProjection) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).context("create projection directory")?;
            }
        }
        let raw = serde_json::to_vec_pretty(projection).context("encode session projection")?;
        std::fs::write(&self.path, raw).context("write session projection")?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("remove session projection"),
        }
    }
}

/// In-process cache for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slot: Mutex<Option<SessionProjection>>,
}

impl ProjectionCache for MemoryCache {
    fn load(&self) -> anyhow::Result<Option<SessionProjection>> {
        let slot = self.slot.lock().map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;
        Ok(slot.clone())
    }

    fn save(&self, projection: &SessionProjection) -> anyhow::Result<()> {
        let mut slot = self.slot.lock().map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;
        *slot = Some(projection.clone());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let mut slot = self.slot.lock().map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;
        *slot = None;
        Ok(())
    }
}

#[cfg(test)]
mod cache_tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::session::dto::{User, UserRole};

    fn sample_projection() -> SessionProjection {
        SessionProjection {
            user: Some(User {
                id: Uuid::new_v4(),
                email: "ana@learnlab.test".into(),
                first_name: Some("Ana".into()),
                last_name: None,
                avatar_url: None,
                role: UserRole::Student,
                created_at: OffsetDateTime::now_utc(),
                updated_at: OffsetDateTime::now_utc(),
            }),
            is_authenticated: true,
        }
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("learnlab-session-{}.json", Uuid::new_v4()))
    }

    #[test]
    fn file_cache_round_trips_across_instances() {
        let path = temp_path();
        let projection = sample_projection();

        JsonFileCache::new(&path).save(&projection).expect("save");

        // A fresh instance models a process restart.
        let reloaded = JsonFileCache::new(&path).load().expect("load");
        assert_eq!(reloaded, Some(projection));

        JsonFileCache::new(&path).clear().expect("clear");
    }

    #[test]
    fn file_cache_load_is_none_when_nothing_stored() {
        let cache = JsonFileCache::new(temp_path());
        assert_eq!(cache.load().expect("load"), None);
    }

    #[test]
    fn file_cache_clear_is_idempotent() {
        let cache = JsonFileCache::new(temp_path());
        cache.clear().expect("first clear");
        cache.clear().expect("second clear");
    }

    #[test]
    fn file_cache_reports_corrupt_content() {
        let path = temp_path();
        std::fs::write(&path, b"not json").expect("write");
        let err = JsonFileCache::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("decode session projection"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn memory_cache_round_trips() {
        let cache = MemoryCache::default();
        let projection = sample_projection();
        assert_eq!(cache.load().expect("load"), None);
        cache.save(&projection).expect("save");
        assert_eq!(cache.load().expect("load"), Some(projection));
        cache.clear().expect("clear");
        assert_eq!(cache.load().expect("load"), None);
    }
}
