//! Persistent selector memory.
//!
//! Records which selectors have worked on which sites for which intents, so
//! the action resolver can put empirically proven selectors at the front of
//! its candidate list. Backed by SQLite; writes are serialized through the
//! connection mutex so concurrent resolvers never lose a success-count
//! increment.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use webpilot_core::{Error, Result};

/// One learned `(domain, description, selector)` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorRecord {
    pub id: i64,
    pub domain: String,
    pub description: String,
    pub selector: String,
    pub success_count: i64,
    pub last_used_at: String,
    pub created_at: String,
}

/// Aggregate view of one domain's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStats {
    pub domain: String,
    pub known_selectors: i64,
    pub total_actions: i64,
    pub successful_actions: i64,
    pub success_rate: f64,
    pub last_activity: Option<String>,
}

/// One attempt appended to the audit history. Reporting only; never read
/// back into control flow.
#[derive(Debug, Clone)]
pub struct ActionRecord<'a> {
    pub domain: &'a str,
    pub action_kind: &'a str,
    pub description: &'a str,
    pub selector_used: Option<&'a str>,
    pub success: bool,
    pub error_message: Option<&'a str>,
    pub duration_ms: Option<u64>,
}

/// SQLite-backed selector memory.
#[derive(Clone)]
pub struct SelectorStore {
    inner: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SelectorStore {
    /// Open (or create) the store at the given path. The schema is created
    /// lazily on first open.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open selector db: {}", e)))?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS known_selectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                action_description TEXT NOT NULL,
                selector TEXT NOT NULL,
                success_count INTEGER NOT NULL DEFAULT 1,
                last_used_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(domain, action_description, selector)
            );

            CREATE TABLE IF NOT EXISTS website_patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                pattern_type TEXT NOT NULL,
                pattern_data TEXT NOT NULL,
                confidence_score REAL NOT NULL DEFAULT 1.0,
                last_updated TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(domain, pattern_type)
            );

            CREATE TABLE IF NOT EXISTS action_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                action_kind TEXT NOT NULL,
                action_description TEXT NOT NULL,
                selector_used TEXT,
                success INTEGER NOT NULL,
                error_message TEXT,
                duration_ms INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_selectors_domain
                ON known_selectors(domain);
            CREATE INDEX IF NOT EXISTS idx_selectors_description
                ON known_selectors(action_description);
            CREATE INDEX IF NOT EXISTS idx_history_domain
                ON action_history(domain);
            ",
        )
        .map_err(|e| Error::Storage(format!("Failed to init selector schema: {}", e)))?;

        debug!("Selector store schema initialized");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }

    /// Upsert a successful selector: increment `success_count` and refresh
    /// `last_used_at` if the exact triple exists, insert with count 1
    /// otherwise.
    pub fn record_success(&self, domain: &str, description: &str, selector: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM known_selectors
                 WHERE domain = ?1 AND action_description = ?2 AND selector = ?3",
                params![domain, description, selector],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE known_selectors
                     SET success_count = success_count + 1, last_used_at = ?1
                     WHERE id = ?2",
                    params![now, id],
                )
                .map_err(|e| Error::Storage(format!("Update error: {}", e)))?;
                debug!(domain, description, selector, "Selector success count incremented");
            }
            None => {
                conn.execute(
                    "INSERT INTO known_selectors
                     (domain, action_description, selector, success_count, last_used_at, created_at)
                     VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                    params![domain, description, selector, now],
                )
                .map_err(|e| Error::Storage(format!("Insert error: {}", e)))?;
                info!(domain, description, selector, "New successful selector learned");
            }
        }
        Ok(())
    }

    /// The most successful selector for an exact `(domain, description)`
    /// pair, ranked by success count then recency.
    pub fn best_selector(&self, domain: &str, description: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT selector FROM known_selectors
             WHERE domain = ?1 AND action_description = ?2
             ORDER BY success_count DESC, last_used_at DESC
             LIMIT 1",
            params![domain, description],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// Token-overlap recall: rows on the domain whose description contains
    /// any word of `description`, ranked by success count. A recall aid for
    /// when no exact match exists; not merged into candidate lists.
    pub fn similar_selectors(
        &self,
        domain: &str,
        description: &str,
        limit: usize,
    ) -> Result<Vec<SelectorRecord>> {
        let conn = self.lock()?;
        let mut results: Vec<SelectorRecord> = Vec::new();

        for word in description.to_lowercase().split_whitespace() {
            let pattern = format!("%{}%", word);
            let mut stmt = conn
                .prepare(
                    "SELECT id, domain, action_description, selector, success_count,
                            last_used_at, created_at
                     FROM known_selectors
                     WHERE domain = ?1 AND lower(action_description) LIKE ?2
                     ORDER BY success_count DESC
                     LIMIT ?3",
                )
                .map_err(|e| Error::Storage(format!("Prepare error: {}", e)))?;

            let rows = stmt
                .query_map(params![domain, pattern, limit as i64], row_to_record)
                .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

            for row in rows {
                let record = row.map_err(|e| Error::Storage(format!("Row error: {}", e)))?;
                if !results.iter().any(|r: &SelectorRecord| r.id == record.id) {
                    results.push(record);
                }
            }
        }

        results.sort_by(|a, b| b.success_count.cmp(&a.success_count));
        results.truncate(limit);
        Ok(results)
    }

    /// Upsert a navigation/layout pattern observed on a domain.
    pub fn record_pattern(
        &self,
        domain: &str,
        pattern_type: &str,
        pattern_data: &str,
        confidence: f64,
    ) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO website_patterns
             (domain, pattern_type, pattern_data, confidence_score, last_updated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(domain, pattern_type) DO UPDATE SET
                pattern_data = excluded.pattern_data,
                confidence_score = excluded.confidence_score,
                last_updated = excluded.last_updated",
            params![domain, pattern_type, pattern_data, confidence, now],
        )
        .map_err(|e| Error::Storage(format!("Pattern upsert error: {}", e)))?;
        Ok(())
    }

    /// Append one attempt to the audit history.
    pub fn record_action(&self, record: ActionRecord<'_>) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO action_history
             (domain, action_kind, action_description, selector_used, success,
              error_message, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.domain,
                record.action_kind,
                record.description,
                record.selector_used,
                record.success as i64,
                record.error_message,
                record.duration_ms.map(|d| d as i64),
                now,
            ],
        )
        .map_err(|e| Error::Storage(format!("History insert error: {}", e)))?;
        Ok(())
    }

    pub fn domain_stats(&self, domain: &str) -> Result<DomainStats> {
        let conn = self.lock()?;

        let known_selectors: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM known_selectors WHERE domain = ?1",
                params![domain],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let (total_actions, successful_actions): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(success), 0)
                 FROM action_history WHERE domain = ?1",
                params![domain],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let last_activity: Option<String> = conn
            .query_row(
                "SELECT MAX(created_at) FROM action_history WHERE domain = ?1",
                params![domain],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let success_rate = if total_actions > 0 {
            successful_actions as f64 / total_actions as f64 * 100.0
        } else {
            0.0
        };

        Ok(DomainStats {
            domain: domain.to_string(),
            known_selectors,
            total_actions,
            successful_actions,
            success_rate: (success_rate * 100.0).round() / 100.0,
            last_activity,
        })
    }

    /// Most active domains by history volume.
    pub fn top_domains(&self, limit: usize) -> Result<Vec<DomainStats>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT h.domain,
                        COUNT(*) AS action_count,
                        COALESCE(SUM(h.success), 0) AS successful,
                        MAX(h.created_at) AS last_activity,
                        (SELECT COUNT(*) FROM known_selectors k WHERE k.domain = h.domain)
                 FROM action_history h
                 GROUP BY h.domain
                 ORDER BY action_count DESC
                 LIMIT ?1",
            )
            .map_err(|e| Error::Storage(format!("Prepare error: {}", e)))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let domain: String = row.get(0)?;
                let total: i64 = row.get(1)?;
                let successful: i64 = row.get(2)?;
                let last_activity: Option<String> = row.get(3)?;
                let known_selectors: i64 = row.get(4)?;
                Ok((domain, total, successful, last_activity, known_selectors))
            })
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let mut domains = Vec::new();
        for row in rows {
            let (domain, total, successful, last_activity, known_selectors) =
                row.map_err(|e| Error::Storage(format!("Row error: {}", e)))?;
            let success_rate = if total > 0 {
                (successful as f64 / total as f64 * 10000.0).round() / 100.0
            } else {
                0.0
            };
            domains.push(DomainStats {
                domain,
                known_selectors,
                total_actions: total,
                successful_actions: successful,
                success_rate,
                last_activity,
            });
        }
        Ok(domains)
    }

    /// Remove history rows older than `days_old` days. Caller-invoked
    /// retention cleanup; learned selectors are never expired.
    pub fn cleanup_history(&self, days_old: i64) -> Result<usize> {
        let conn = self.lock()?;
        let cutoff = (Utc::now() - chrono::Duration::days(days_old)).to_rfc3339();
        let removed = conn
            .execute(
                "DELETE FROM action_history WHERE created_at < ?1",
                params![cutoff],
            )
            .map_err(|e| Error::Storage(format!("Cleanup error: {}", e)))?;
        info!(days_old, removed, "Action history cleaned up");
        Ok(removed)
    }

    /// Export the learned selectors as a JSON snapshot.
    pub fn export(&self, path: &Path) -> Result<usize> {
        let selectors = self.all_selectors()?;
        let export = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "known_selectors": selectors,
            "total_selectors": selectors.len(),
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&export)?)?;
        info!(path = %path.display(), count = selectors.len(), "Selector knowledge exported");
        Ok(selectors.len())
    }

    fn all_selectors(&self) -> Result<Vec<SelectorRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, domain, action_description, selector, success_count,
                        last_used_at, created_at
                 FROM known_selectors
                 ORDER BY domain, success_count DESC",
            )
            .map_err(|e| Error::Storage(format!("Prepare error: {}", e)))?;

        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let mut selectors = Vec::new();
        for row in rows {
            selectors.push(row.map_err(|e| Error::Storage(format!("Row error: {}", e)))?);
        }
        Ok(selectors)
    }

    /// Overall store statistics.
    pub fn stats(&self) -> Result<serde_json::Value> {
        let conn = self.lock()?;
        let total_selectors: i64 = conn
            .query_row("SELECT COUNT(*) FROM known_selectors", [], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        let total_domains: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT domain) FROM known_selectors",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        let (total_actions, successful_actions): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM action_history",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let success_rate = if total_actions > 0 {
            (successful_actions as f64 / total_actions as f64 * 10000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(serde_json::json!({
            "total_selectors": total_selectors,
            "total_domains": total_domains,
            "total_actions": total_actions,
            "successful_actions": successful_actions,
            "overall_success_rate": success_rate,
        }))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SelectorRecord> {
    Ok(SelectorRecord {
        id: row.get(0)?,
        domain: row.get(1)?,
        description: row.get(2)?,
        selector: row.get(3)?,
        success_count: row.get(4)?,
        last_used_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SelectorStore {
        SelectorStore::open(&dir.path().join("selectors.db")).unwrap()
    }

    #[test]
    fn test_record_success_is_an_upsert() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.record_success("example.com", "search box", "#search").unwrap();
        store.record_success("example.com", "search box", "#search").unwrap();

        let all = store.all_selectors().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].success_count, 2);
    }

    #[test]
    fn test_best_selector_ranks_by_success_count() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.record_success("example.com", "login button", ".login-alt").unwrap();
        store.record_success("example.com", "login button", "#login").unwrap();
        store.record_success("example.com", "login button", "#login").unwrap();

        let best = store.best_selector("example.com", "login button").unwrap();
        assert_eq!(best.as_deref(), Some("#login"));
    }

    #[test]
    fn test_best_selector_misses_other_domains() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.record_success("example.com", "login button", "#login").unwrap();
        let best = store.best_selector("other.com", "login button").unwrap();
        assert!(best.is_none());
    }

    #[test]
    fn test_similar_selectors_token_overlap() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.record_success("example.com", "search input field", "#q").unwrap();
        store.record_success("example.com", "login button", "#login").unwrap();

        let similar = store.similar_selectors("example.com", "the search bar", 5).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].selector, "#q");
    }

    #[test]
    fn test_action_history_and_stats() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .record_action(ActionRecord {
                domain: "example.com",
                action_kind: "click",
                description: "login button",
                selector_used: Some("#login"),
                success: true,
                error_message: None,
                duration_ms: Some(120),
            })
            .unwrap();
        store
            .record_action(ActionRecord {
                domain: "example.com",
                action_kind: "click",
                description: "missing button",
                selector_used: None,
                success: false,
                error_message: Some("no candidates matched"),
                duration_ms: Some(800),
            })
            .unwrap();

        let stats = store.domain_stats("example.com").unwrap();
        assert_eq!(stats.total_actions, 2);
        assert_eq!(stats.successful_actions, 1);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);

        let top = store.top_domains(5).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].domain, "example.com");
    }

    #[test]
    fn test_cleanup_history_spares_recent_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .record_action(ActionRecord {
                domain: "example.com",
                action_kind: "navigate",
                description: "home",
                selector_used: None,
                success: true,
                error_message: None,
                duration_ms: None,
            })
            .unwrap();

        let removed = store.cleanup_history(30).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.domain_stats("example.com").unwrap().total_actions, 1);
    }

    #[test]
    fn test_export_shape() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.record_success("example.com", "search box", "#search").unwrap();

        let export_path = dir.path().join("knowledge.json");
        let count = store.export(&export_path).unwrap();
        assert_eq!(count, 1);

        let exported: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&export_path).unwrap()).unwrap();
        assert_eq!(exported["total_selectors"], 1);
        assert!(exported["exported_at"].is_string());
        assert_eq!(exported["known_selectors"][0]["selector"], "#search");
    }

    #[test]
    fn test_record_pattern_upserts() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.record_pattern("example.com", "cookie_banner", "#consent", 0.8).unwrap();
        store.record_pattern("example.com", "cookie_banner", "#cookie-accept", 0.9).unwrap();

        let conn = store.inner.lock().unwrap();
        let (data, confidence): (String, f64) = conn
            .query_row(
                "SELECT pattern_data, confidence_score FROM website_patterns
                 WHERE domain = 'example.com' AND pattern_type = 'cookie_banner'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(data, "#cookie-accept");
        assert!((confidence - 0.9).abs() < f64::EPSILON);
    }
}
