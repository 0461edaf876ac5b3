//! Four-tier memory store.
//!
//! Recent holds the latest exchanges verbatim. When it is full, the oldest
//! entry is embedded and moves to Daily. Completed days in Daily are condensed
//! into a single Archived summary by [`TieredMemoryStore::rollover`]. Static
//! knowledge is loaded once and never changes.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use super::knowledge::load_knowledge_file;
use super::similarity::{cosine_similarity, mean, normalize, weighted_combine};
use crate::config::MemoryConfig;
use crate::error::{ErrorCode, PonderError, PonderResult};
use crate::store::SqliteStateStore;
use crate::traits::{Embedder, Summarizer};
use crate::types::{MemoryRecord, SearchHit, SearchScope, Tier};

/// Minimum length for a context thought to count toward the search context.
const MIN_CONTEXT_LEN: usize = 10;

#[derive(Debug, Default)]
struct Tiers {
    recent: VecDeque<MemoryRecord>,
    daily: Vec<MemoryRecord>,
    archived: Vec<MemoryRecord>,
    static_knowledge: Vec<MemoryRecord>,
}

impl Tiers {
    fn tier(&self, tier: Tier) -> Box<dyn Iterator<Item = &MemoryRecord> + '_> {
        match tier {
            Tier::Recent => Box::new(self.recent.iter()),
            Tier::Daily => Box::new(self.daily.iter()),
            Tier::Archived => Box::new(self.archived.iter()),
            Tier::Static => Box::new(self.static_knowledge.iter()),
        }
    }
}

/// Record counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub recent: usize,
    pub daily: usize,
    pub archived: usize,
    pub static_knowledge: usize,
}

/// Outcome of one rollover pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloverReport {
    pub archived_days: Vec<NaiveDate>,
    /// Days left in Daily because summarising or persisting failed.
    pub failed_days: Vec<NaiveDate>,
    /// Daily entries removed.
    pub purged: usize,
}

/// Tiered memory with semantic search.
pub struct TieredMemoryStore {
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn Summarizer>,
    persistence: Option<Arc<SqliteStateStore>>,
    config: MemoryConfig,
    tiers: RwLock<Tiers>,
    /// Serialises inserts and rollover; searches only take `tiers` briefly.
    write_lock: tokio::sync::Mutex<()>,
}

impl TieredMemoryStore {
    pub fn new(
        config: MemoryConfig,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            embedder,
            summarizer,
            persistence: None,
            config,
            tiers: RwLock::new(Tiers::default()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Mirror every change into `store`.
    pub fn with_persistence(mut self, store: Arc<SqliteStateStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Tiers> {
        self.tiers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tiers> {
        self.tiers.write().unwrap_or_else(|e| e.into_inner())
    }

    async fn with_deadline<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = PonderResult<T>>,
    ) -> PonderResult<T> {
        let deadline: Duration = self.config.call_timeout();
        tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| PonderError::timeout(operation, deadline))?
    }

    async fn embed(&self, text: &str) -> PonderResult<Vec<f32>> {
        let vector = self.with_deadline("embed", self.embedder.embed(text)).await?;
        if vector.is_empty() {
            return Err(PonderError::Embedding {
                message: "embedder returned an empty vector".to_string(),
                code: ErrorCode::EmbEmptyVector,
                source: None,
            });
        }
        Ok(vector)
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load Recent, Daily and Archived from persistence.
    pub fn restore(&self) -> PonderResult<MemoryStats> {
        let Some(store) = &self.persistence else {
            return Ok(self.stats());
        };
        let recent = store.load_records(Tier::Recent)?;
        let daily = store.load_records(Tier::Daily)?;
        let archived = store.load_records(Tier::Archived)?;
        {
            let mut tiers = self.write();
            tiers.recent = recent.into();
            tiers.daily = daily;
            tiers.archived = archived;
        }
        let stats = self.stats();
        info!(
            recent = stats.recent,
            daily = stats.daily,
            archived = stats.archived,
            "Memory restored"
        );
        Ok(stats)
    }

    /// Add pre-embedded Static records. Records without an embedding are rejected.
    pub fn add_static(&self, records: Vec<MemoryRecord>) -> usize {
        let mut tiers = self.write();
        let before = tiers.static_knowledge.len();
        tiers.static_knowledge.extend(
            records
                .into_iter()
                .filter(|r| r.embedding.as_ref().is_some_and(|e| !e.is_empty()))
                .map(|mut r| {
                    r.tier = Tier::Static;
                    r
                }),
        );
        tiers.static_knowledge.len() - before
    }

    /// Load Static knowledge from files. Unreadable files are logged and skipped.
    pub fn load_static(&self, paths: &[PathBuf]) -> usize {
        let mut loaded = 0;
        for path in paths {
            match load_knowledge_file(path) {
                Ok(records) => {
                    let added = self.add_static(records);
                    info!(path = %path.display(), chunks = added, "Loaded static knowledge");
                    loaded += added;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to load static knowledge"),
            }
        }
        loaded
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert a new Recent entry, migrating overflow to Daily first.
    ///
    /// The overflowing entries are embedded before anything changes, so an
    /// embedding failure rejects the insert and leaves every tier untouched.
    pub async fn insert(
        &self,
        text: impl Into<String>,
        role: &str,
        timestamp: DateTime<Utc>,
    ) -> PonderResult<MemoryRecord> {
        let _guard = self.write_lock.lock().await;
        let capacity = self.config.recent_capacity.max(1);

        let overflow: Vec<MemoryRecord> = {
            let tiers = self.read();
            let excess = (tiers.recent.len() + 1).saturating_sub(capacity);
            tiers.recent.iter().take(excess).cloned().collect()
        };

        let mut migrated = Vec::with_capacity(overflow.len());
        for mut record in overflow {
            let embedding = match self.embed(&record.text).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Overflow embedding failed, insert rejected");
                    return Err(e);
                }
            };
            record.tier = Tier::Daily;
            record.embedding = Some(embedding);
            migrated.push(record);
        }

        let record = MemoryRecord::recent(text, timestamp)
            .with_metadata("role", serde_json::Value::from(role));

        if let Some(store) = &self.persistence {
            store.insert_recent(&migrated, &record)?;
        }

        let mut tiers = self.write();
        for m in migrated {
            match tiers.recent.front() {
                Some(front) if front.id == m.id => {
                    tiers.recent.pop_front();
                }
                _ => {
                    error!(record_id = %m.id, "Recent tier changed during insert");
                    return Err(PonderError::invariant(
                        "memory",
                        ErrorCode::InvCapacityExceeded,
                        "recent tier changed while the write lock was held",
                    ));
                }
            }
            debug!(record_id = %m.id, day = %m.day(), "Migrated recent entry to daily");
            tiers.daily.push(m);
        }
        tiers.recent.push_back(record.clone());

        if tiers.recent.len() > capacity {
            error!(len = tiers.recent.len(), capacity, "Recent tier over capacity");
            return Err(PonderError::invariant(
                "memory",
                ErrorCode::InvCapacityExceeded,
                format!("recent tier holds {} > {}", tiers.recent.len(), capacity),
            ));
        }
        Ok(record)
    }

    /// Archive every Daily day strictly before `today`, oldest first.
    ///
    /// A day whose summary cannot be produced, embedded or persisted stays in
    /// Daily and is retried on the next call.
    pub async fn rollover(&self, today: NaiveDate) -> RolloverReport {
        let _guard = self.write_lock.lock().await;
        let mut report = RolloverReport::default();

        let days: BTreeMap<NaiveDate, Vec<MemoryRecord>> = {
            let tiers = self.read();
            let mut days: BTreeMap<NaiveDate, Vec<MemoryRecord>> = BTreeMap::new();
            for record in tiers.daily.iter().filter(|r| r.day() < today) {
                days.entry(record.day()).or_default().push(record.clone());
            }
            days
        };

        for (day, records) in days {
            let archived = match self.summarize_day(day, &records).await {
                Ok(archived) => archived,
                Err(e) => {
                    warn!(day = %day, entries = records.len(), error = %e, "Day rollover failed, keeping daily entries");
                    report.failed_days.push(day);
                    continue;
                }
            };

            if let Some(store) = &self.persistence {
                if let Err(e) = store.archive_day(day, &archived) {
                    warn!(day = %day, error = %e, "Persisting archived day failed, keeping daily entries");
                    report.failed_days.push(day);
                    continue;
                }
            }

            let purged = {
                let mut tiers = self.write();
                let before = tiers.daily.len();
                tiers.daily.retain(|r| r.day() != day);
                tiers.archived.push(archived);
                before - tiers.daily.len()
            };

            info!(day = %day, purged, "Archived day");
            report.purged += purged;
            report.archived_days.push(day);
        }

        report
    }

    async fn summarize_day(
        &self,
        day: NaiveDate,
        records: &[MemoryRecord],
    ) -> PonderResult<MemoryRecord> {
        let (summary, kind) = match records {
            [single] => {
                let text = match single.role() {
                    Some(role) => format!("Brief interaction: {} said: {}", role, single.text),
                    None => format!("Brief interaction: {}", single.text),
                };
                (text, "brief")
            }
            _ => {
                let text = self
                    .with_deadline("summarize", self.summarizer.summarize(day, records))
                    .await?;
                if text.trim().is_empty() {
                    return Err(PonderError::summarization("summarizer returned empty text"));
                }
                (text, "summary")
            }
        };

        let embedding = self.embed(&summary).await?;
        let timestamp = records
            .iter()
            .map(|r| r.timestamp)
            .max()
            .unwrap_or_else(Utc::now);

        let mut archived = MemoryRecord::recent(summary, timestamp)
            .with_metadata("day", serde_json::Value::from(day.to_string()))
            .with_metadata("entry_count", serde_json::Value::from(records.len()))
            .with_metadata("summary_kind", serde_json::Value::from(kind));
        archived.tier = Tier::Archived;
        archived.embedding = Some(embedding);
        Ok(archived)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Semantic search over the tiers in `scope` at the configured
    /// `min_similarity`.
    ///
    /// `context` is recent thought text; when it yields an embedding the query
    /// vector is blended with it. Unembeddable queries return nothing.
    pub async fn search(
        &self,
        query: &str,
        context: &[String],
        k: usize,
        scope: SearchScope,
    ) -> Vec<SearchHit> {
        self.search_with_threshold(query, context, k, self.config.min_similarity, scope)
            .await
    }

    /// [`search`](Self::search) with an explicit similarity floor.
    pub async fn search_with_threshold(
        &self,
        query: &str,
        context: &[String],
        k: usize,
        min_similarity: f32,
        scope: SearchScope,
    ) -> Vec<SearchHit> {
        if query.trim().is_empty() || k == 0 {
            return Vec::new();
        }

        let query_vec = match self.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Query embedding failed, returning no memories");
                return Vec::new();
            }
        };

        let search_vec = match self.context_embedding(context).await {
            Some(ctx) => weighted_combine(
                &query_vec,
                &ctx,
                self.config.query_weight,
                self.config.context_weight,
            ),
            None => normalize(query_vec),
        };

        let mut hits: Vec<SearchHit> = {
            let tiers = self.read();
            [Tier::Daily, Tier::Archived, Tier::Static]
                .into_iter()
                .filter(|t| scope.includes(*t))
                .flat_map(|t| tiers.tier(t))
                .filter_map(|record| {
                    let embedding = record.embedding.as_ref()?;
                    let similarity = cosine_similarity(&search_vec, embedding);
                    (similarity >= min_similarity).then(|| SearchHit {
                        record: record.clone(),
                        similarity,
                    })
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
        });
        hits.truncate(k);
        debug!(query_len = query.len(), hits = hits.len(), "Memory search");
        hits
    }

    async fn context_embedding(&self, context: &[String]) -> Option<Vec<f32>> {
        let texts: Vec<String> = context
            .iter()
            .filter(|t| t.trim().len() > MIN_CONTEXT_LEN)
            .rev()
            .take(self.config.context_thoughts)
            .cloned()
            .collect();
        if texts.is_empty() {
            return None;
        }
        match self
            .with_deadline("embed_batch", self.embedder.embed_batch(&texts))
            .await
        {
            Ok(vectors) => mean(&vectors),
            Err(e) => {
                debug!(error = %e, "Context embedding failed, searching with query only");
                None
            }
        }
    }

    /// Latest `n` Recent entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<MemoryRecord> {
        let tiers = self.read();
        let skip = tiers.recent.len().saturating_sub(n);
        tiers.recent.iter().skip(skip).cloned().collect()
    }

    /// Snapshot of one tier.
    pub fn records(&self, tier: Tier) -> Vec<MemoryRecord> {
        self.read().tier(tier).cloned().collect()
    }

    pub fn tier_len(&self, tier: Tier) -> usize {
        let tiers = self.read();
        match tier {
            Tier::Recent => tiers.recent.len(),
            Tier::Daily => tiers.daily.len(),
            Tier::Archived => tiers.archived.len(),
            Tier::Static => tiers.static_knowledge.len(),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        let tiers = self.read();
        MemoryStats {
            recent: tiers.recent.len(),
            daily: tiers.daily.len(),
            archived: tiers.archived.len(),
            static_knowledge: tiers.static_knowledge.len(),
        }
    }
}
