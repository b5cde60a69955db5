//! Project lookup by publishable token.
//!
//! The project table is owned by the dashboard service. The gateway reads a
//! SQLite replica of it through [`SqliteProjectStore`] and keeps recently
//! resolved tokens in a [`CachedProjectLookup`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use moka::future::Cache;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

/// Prefix carried by every publishable project token.
pub const PUBLISHABLE_TOKEN_PREFIX: &str = "zori_pt_";

/// Default cache capacity (number of tokens).
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Project fields the gateway needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub organization_id: String,
    pub domain: String,
    /// Whether events sent from a `localhost` host are accepted.
    pub allow_local_host: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("project store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("invalid project database path: {0}")]
    Path(#[from] std::io::Error),
}

/// Resolves a publishable token to its project.
#[async_trait]
pub trait ProjectLookup: Send + Sync {
    /// `Ok(None)` when no project carries the token.
    async fn by_publishable_token(&self, token: &str) -> Result<Option<Project>, LookupError>;
}

/// Read-only view of the project table in SQLite.
pub struct SqliteProjectStore {
    conn: Mutex<Connection>,
}

impl SqliteProjectStore {
    /// Open the replica read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            read_only_uri(path)?,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        tracing::info!("Project database connected (read-only): {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl ProjectLookup for SqliteProjectStore {
    async fn by_publishable_token(&self, token: &str) -> Result<Option<Project>, LookupError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, organization_id, domain, allow_localhost
             FROM projects
             WHERE publishable_token = ?1",
        )?;

        let project = stmt
            .query_row([token], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    domain: row.get(2)?,
                    allow_local_host: row.get(3)?,
                })
            })
            .optional()?;

        Ok(project)
    }
}

/// Read-only SQLite URI for `path`.
///
/// The URI authority must be empty or `localhost`, so relative paths are made
/// absolute to get the `file:///path` form.
fn read_only_uri(path: &Path) -> std::io::Result<String> {
    let absolute = std::path::absolute(path)?;
    let escaped = absolute
        .to_string_lossy()
        .replace('%', "%25")
        .replace('?', "%3F")
        .replace('#', "%23");
    Ok(format!("file://{escaped}?mode=ro"))
}

/// TTL cache in front of another lookup.
///
/// Only hits are cached, so a token created after a miss resolves on the next
/// request.
pub struct CachedProjectLookup {
    inner: Arc<dyn ProjectLookup>,
    cache: Cache<String, Project>,
}

impl CachedProjectLookup {
    pub fn new(inner: Arc<dyn ProjectLookup>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(DEFAULT_CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl ProjectLookup for CachedProjectLookup {
    async fn by_publishable_token(&self, token: &str) -> Result<Option<Project>, LookupError> {
        if let Some(project) = self.cache.get(token).await {
            return Ok(Some(project));
        }

        counter!("gateway_project_cache_misses_total").increment(1);
        let project = self.inner.by_publishable_token(token).await?;
        if let Some(project) = &project {
            self.cache.insert(token.to_string(), project.clone()).await;
        }
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn seed_db(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("projects.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE projects (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                allow_localhost INTEGER NOT NULL,
                publishable_token TEXT NOT NULL UNIQUE
             );
             INSERT INTO projects VALUES
                ('prj_1', 'org_1', 'https://example.com', 0, 'zori_pt_live'),
                ('prj_2', 'org_1', 'http://localhost:3000', 1, 'zori_pt_dev');",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_sqlite_lookup() {
        let dir = TempDir::new().unwrap();
        let store = SqliteProjectStore::open(seed_db(&dir)).unwrap();

        let project = store
            .by_publishable_token("zori_pt_dev")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.id, "prj_2");
        assert_eq!(project.organization_id, "org_1");
        assert!(project.allow_local_host);

        let live = store
            .by_publishable_token("zori_pt_live")
            .await
            .unwrap()
            .unwrap();
        assert!(!live.allow_local_host);

        assert!(
            store
                .by_publishable_token("zori_pt_unknown")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_read_only_uri_is_absolute() {
        let uri = read_only_uri(Path::new("./data/projects.db")).unwrap();
        assert!(uri.starts_with("file:///"), "{uri}");
        assert!(uri.ends_with("/data/projects.db?mode=ro"), "{uri}");

        let uri = read_only_uri(Path::new("/srv/zori/projects#1?.db")).unwrap();
        assert_eq!(uri, "file:///srv/zori/projects%231%3F.db?mode=ro");
    }

    #[tokio::test]
    async fn test_open_relative_path() {
        // Created under the working directory so its path stays relative.
        let dir = TempDir::new_in(".").unwrap();
        let path = seed_db(&dir);
        assert!(path.is_relative());

        let store = SqliteProjectStore::open(&path).unwrap();
        let project = store
            .by_publishable_token("zori_pt_live")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.id, "prj_1");
    }

    #[test]
    fn test_open_missing_database_fails() {
        let dir = TempDir::new().unwrap();
        assert!(SqliteProjectStore::open(dir.path().join("absent.db")).is_err());
    }

    /// Lookup that counts how often it is asked.
    struct CountingLookup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProjectLookup for CountingLookup {
        async fn by_publishable_token(
            &self,
            token: &str,
        ) -> Result<Option<Project>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((token == "zori_pt_known").then(|| Project {
                id: "prj_1".to_string(),
                organization_id: "org_1".to_string(),
                domain: "https://example.com".to_string(),
                allow_local_host: false,
            }))
        }
    }

    #[tokio::test]
    async fn test_cache_hits_skip_inner_lookup() {
        let inner = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedProjectLookup::new(inner.clone(), Duration::from_secs(60));

        for _ in 0..3 {
            let project = cached.by_publishable_token("zori_pt_known").await.unwrap();
            assert_eq!(project.unwrap().id, "prj_1");
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_does_not_remember_misses() {
        let inner = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedProjectLookup::new(inner.clone(), Duration::from_secs(60));

        assert!(cached.by_publishable_token("zori_pt_nope").await.unwrap().is_none());
        assert!(cached.by_publishable_token("zori_pt_nope").await.unwrap().is_none());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
