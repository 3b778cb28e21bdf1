//! inferwatch persistence: SQLite history of accepted topic records and the
//! last seen competition listing.

#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use inferwatch_core::{CompetitionListing, CompetitionStore, DurableStore, MaterializedRecord};
use metrics::{counter, histogram};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DB_FILE_NAME: &str = "inferwatch.db";

/// A stored record plus its neighbours in acceptance-time order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    pub record: MaterializedRecord,
    pub prev_height: Option<String>,
    pub next_height: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeightsPage {
    pub topic_id: String,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
    /// Newest first.
    pub heights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicStats {
    pub topic_id: String,
    pub count: i64,
    pub oldest: Option<String>,
    pub newest: Option<String>,
    pub total_size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbStats {
    pub topic_rows: i64,
    pub distinct_topics: i64,
    pub competitions: i64,
    pub total_size_bytes: i64,
}

/// SQLite-backed store behind a single connection.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open `<dir>/inferwatch.db`, creating the directory when missing.
    pub fn open_in_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating data dir {}", dir.display()))?;
        let path = dir.join(DB_FILE_NAME);
        Self::open(&path.to_string_lossy())
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = Instant::now();
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS topic_inferences (
                topic_id               TEXT NOT NULL,
                timestamp              TEXT NOT NULL,
                inference_block_height TEXT NOT NULL,
                loss_block_height      TEXT NOT NULL,
                data                   BLOB NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_topic_inferences_topic_height
                ON topic_inferences(topic_id, inference_block_height);
            CREATE INDEX IF NOT EXISTS idx_topic_inferences_topic_ts
                ON topic_inferences(topic_id, timestamp);
            CREATE TABLE IF NOT EXISTS competitions (
                id          INTEGER PRIMARY KEY,
                name        TEXT NOT NULL,
                topic_id    INTEGER NOT NULL,
                prize_pool  INTEGER NOT NULL,
                start_date  TEXT NOT NULL,
                end_date    TEXT NOT NULL,
                season_id   INTEGER NOT NULL,
                tags        TEXT NOT NULL,
                is_active   INTEGER NOT NULL,
                timestamp   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_competitions_topic ON competitions(topic_id);",
        )
        .context("creating schema")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(%path, "persist: opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert, or overwrite the row with the same topic and inference height.
    pub fn save_record(&self, record: &MaterializedRecord) -> Result<()> {
        let started = Instant::now();
        let json = serde_json::to_string(record).context("encoding record")?;
        let blob = maybe_compress(&json);
        let ts = normalize_ts(&record.timestamp);
        self.conn()
            .execute(
                "INSERT INTO topic_inferences(topic_id, timestamp, inference_block_height, loss_block_height, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(topic_id, inference_block_height) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    loss_block_height = excluded.loss_block_height,
                    data = excluded.data",
                (&record.topic_id, &ts, &record.inference_block_height, &record.loss_block_height, &blob),
            )
            .with_context(|| format!("upserting topic {} at {}", record.topic_id, record.inference_block_height))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    /// Newest record by timestamp, with the height stored just before it.
    pub fn latest(&self, topic: &str) -> Result<Option<StoredRecord>> {
        let db = self.conn();
        let row: Option<(String, Vec<u8>)> = db
            .query_row(
                "SELECT timestamp, data FROM topic_inferences WHERE topic_id = ?1
                 ORDER BY timestamp DESC, rowid DESC LIMIT 1",
                [topic],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((ts, blob)) = row else { return Ok(None) };
        let record = decode_record(&blob)?;
        let prev_height = neighbour(&db, topic, &ts, Neighbour::Prev)?;
        Ok(Some(StoredRecord { record, prev_height, next_height: None }))
    }

    pub fn at_height(&self, topic: &str, height: &str) -> Result<Option<StoredRecord>> {
        let db = self.conn();
        let row: Option<(String, Vec<u8>)> = db
            .query_row(
                "SELECT timestamp, data FROM topic_inferences
                 WHERE topic_id = ?1 AND inference_block_height = ?2 LIMIT 1",
                [topic, height],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((ts, blob)) = row else { return Ok(None) };
        let record = decode_record(&blob)?;
        let prev_height = neighbour(&db, topic, &ts, Neighbour::Prev)?;
        let next_height = neighbour(&db, topic, &ts, Neighbour::Next)?;
        Ok(Some(StoredRecord { record, prev_height, next_height }))
    }

    /// Records with `start <= timestamp <= end`, oldest first.
    pub fn range(&self, topic: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<MaterializedRecord>> {
        let started = Instant::now();
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT data FROM topic_inferences
             WHERE topic_id = ?1 AND timestamp BETWEEN ?2 AND ?3 ORDER BY timestamp",
        )?;
        let mut rows = stmt.query((topic, fmt_ts(start), fmt_ts(end)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(0)?;
            out.push(decode_record(&blob)?);
        }
        histogram!("persist_range_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    /// Page of stored heights, newest first. Non-positive limits default to 100.
    pub fn heights(&self, topic: &str, limit: i64, offset: i64) -> Result<HeightsPage> {
        let limit = if limit <= 0 { 100 } else { limit };
        let offset = offset.max(0);
        let db = self.conn();
        let total_count: i64 =
            db.query_row("SELECT COUNT(*) FROM topic_inferences WHERE topic_id = ?1", [topic], |r| r.get(0))?;
        let mut stmt = db.prepare(
            "SELECT inference_block_height FROM topic_inferences WHERE topic_id = ?1
             ORDER BY timestamp DESC, rowid DESC LIMIT ?2 OFFSET ?3",
        )?;
        let heights = stmt
            .query_map((topic, limit, offset), |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(HeightsPage { topic_id: topic.to_string(), total_count, limit, offset, heights })
    }

    pub fn topic_stats(&self, topic: &str) -> Result<TopicStats> {
        let db = self.conn();
        let (count, oldest, newest, size) = db.query_row(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp), SUM(LENGTH(data))
             FROM topic_inferences WHERE topic_id = ?1",
            [topic],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?, r.get::<_, Option<String>>(2)?, r.get::<_, Option<i64>>(3)?)),
        )?;
        Ok(TopicStats { topic_id: topic.to_string(), count, oldest, newest, total_size_bytes: size.unwrap_or(0) })
    }

    pub fn db_stats(&self) -> Result<DbStats> {
        let db = self.conn();
        let (topic_rows, distinct_topics, size) = db.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT topic_id), SUM(LENGTH(data)) FROM topic_inferences",
            [],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, Option<i64>>(2)?)),
        )?;
        let competitions: i64 = db.query_row("SELECT COUNT(*) FROM competitions", [], |r| r.get(0))?;
        Ok(DbStats { topic_rows, distinct_topics, competitions, total_size_bytes: size.unwrap_or(0) })
    }

    /// Most recently listed competition for a numeric topic id.
    pub fn competition_for_topic(&self, topic: &str) -> Result<Option<i64>> {
        let Ok(topic_num) = topic.trim().parse::<i64>() else { return Ok(None) };
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM competitions WHERE topic_id = ?1
                 ORDER BY timestamp DESC, is_active DESC, id DESC LIMIT 1",
                [topic_num],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id)
    }
}

enum Neighbour {
    Prev,
    Next,
}

fn neighbour(db: &Connection, topic: &str, ts: &str, which: Neighbour) -> Result<Option<String>> {
    let sql = match which {
        Neighbour::Prev => {
            "SELECT inference_block_height FROM topic_inferences WHERE topic_id = ?1 AND timestamp < ?2
             ORDER BY timestamp DESC LIMIT 1"
        }
        Neighbour::Next => {
            "SELECT inference_block_height FROM topic_inferences WHERE topic_id = ?1 AND timestamp > ?2
             ORDER BY timestamp ASC LIMIT 1"
        }
    };
    Ok(db.query_row(sql, [topic, ts], |r| r.get::<_, String>(0)).optional()?)
}

impl DurableStore for SqliteStore {
    fn save_topic_snapshot(&self, record: &MaterializedRecord) -> Result<()> {
        self.save_record(record)
    }

    fn resolve_competition_id(&self, topic: &str) -> Result<Option<String>> {
        Ok(self.competition_for_topic(topic)?.map(|id| id.to_string()))
    }
}

impl CompetitionStore for SqliteStore {
    fn save_competitions(&self, listing: &CompetitionListing) -> Result<()> {
        let started = Instant::now();
        let now = fmt_ts(Utc::now());
        let mut db = self.conn();
        let tx = db.transaction()?;
        let mut n = 0usize;
        for (comp, past) in listing.iter_all() {
            let tags = serde_json::to_string(&comp.tags).context("encoding tags")?;
            tx.execute(
                "INSERT INTO competitions(id, name, topic_id, prize_pool, start_date, end_date, season_id, tags, is_active, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, topic_id = excluded.topic_id, prize_pool = excluded.prize_pool,
                    start_date = excluded.start_date, end_date = excluded.end_date, season_id = excluded.season_id,
                    tags = excluded.tags, is_active = excluded.is_active, timestamp = excluded.timestamp",
                rusqlite::params![
                    comp.id,
                    comp.name,
                    comp.topic_id,
                    comp.prize_pool,
                    comp.start_date,
                    comp.end_date,
                    comp.season_id,
                    tags,
                    comp.is_active(past),
                    now,
                ],
            )
            .with_context(|| format!("upserting competition {}", comp.id))?;
            n += 1;
        }
        tx.commit()?;
        histogram!("persist_competitions_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(competitions = n, "persist: saved competition listing");
        Ok(())
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = fmt_ts(cutoff);
        let db = self.conn();
        let topics = db.execute("DELETE FROM topic_inferences WHERE timestamp < ?1", [&cutoff])?;
        let comps = db.execute("DELETE FROM competitions WHERE timestamp < ?1", [&cutoff])?;
        if topics + comps > 0 {
            info!(topic_rows = topics, competitions = comps, %cutoff, "persist: pruned");
        }
        counter!("persist_pruned_total", (topics + comps) as u64);
        Ok(topics + comps)
    }
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Bring RFC 3339 strings to one fixed-width UTC form so text order is time order.
fn normalize_ts(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| fmt_ts(t.with_timezone(&Utc)))
        .unwrap_or_else(|_| raw.to_string())
}

fn decode_record(blob: &[u8]) -> Result<MaterializedRecord> {
    let json = maybe_decompress(blob);
    serde_json::from_str(&json).context("decoding stored record")
}

pub fn maybe_compress(json: &str) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("INFERWATCH_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(json.as_bytes(), lvl).unwrap_or_else(|_| json.as_bytes().to_vec());
    }
    json.as_bytes().to_vec()
}

pub fn maybe_decompress(blob: &[u8]) -> String {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return String::from_utf8_lossy(&de).to_string();
        }
    }
    String::from_utf8_lossy(blob).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use inferwatch_core::{Competition, WorkerRecord};

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!(
            "inferwatch-test-{}.db",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        );
        dir.join(f).to_string_lossy().to_string()
    }

    fn record(topic: &str, height: &str, loss: &str, minute: u32) -> MaterializedRecord {
        let mut w = WorkerRecord::new("allo1a");
        w.inferer_value = Some(format!("{}.0", height));
        MaterializedRecord {
            topic_id: topic.into(),
            timestamp: format!("2025-02-01T10:{:02}:00Z", minute),
            inference_block_height: height.into(),
            loss_block_height: loss.into(),
            workers: vec![w],
            ..MaterializedRecord::default()
        }
    }

    #[test]
    fn upsert_by_topic_and_height_keeps_one_row() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        s.save_record(&record("13", "100", "90", 0)).unwrap();
        s.save_record(&record("13", "100", "95", 1)).unwrap();
        let stats = s.topic_stats("13").unwrap();
        assert_eq!(stats.count, 1);
        let latest = s.latest("13").unwrap().unwrap();
        assert_eq!(latest.record.loss_block_height, "95");
        assert!(latest.prev_height.is_none());
    }

    #[test]
    fn height_lookup_reports_neighbours_by_time() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        for (i, h) in ["100", "110", "120"].iter().enumerate() {
            s.save_record(&record("13", h, "0", i as u32)).unwrap();
        }
        let mid = s.at_height("13", "110").unwrap().unwrap();
        assert_eq!(mid.prev_height.as_deref(), Some("100"));
        assert_eq!(mid.next_height.as_deref(), Some("120"));
        assert_eq!(mid.record.workers[0].inferer_value.as_deref(), Some("110.0"));
        assert!(s.at_height("13", "999").unwrap().is_none());
        assert_eq!(s.latest("13").unwrap().unwrap().prev_height.as_deref(), Some("110"));
    }

    #[test]
    fn heights_page_is_newest_first_and_counts_all() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        for i in 0..5u32 {
            s.save_record(&record("7", &format!("{}", 200 + i), "0", i)).unwrap();
        }
        s.save_record(&record("8", "1", "0", 0)).unwrap();
        let page = s.heights("7", 2, 1).unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.heights, vec!["203".to_string(), "202".to_string()]);
        assert_eq!(s.heights("7", 0, -3).unwrap().limit, 100);
    }

    #[test]
    fn range_is_inclusive_and_ordered() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        for i in 0..4u32 {
            s.save_record(&record("7", &format!("{}", 300 + i), "0", i * 10)).unwrap();
        }
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 10, 10, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 2, 1, 10, 20, 0).unwrap();
        let got: Vec<String> = s.range("7", start, end).unwrap().into_iter().map(|r| r.inference_block_height).collect();
        assert_eq!(got, vec!["301".to_string(), "302".to_string()]);
    }

    #[test]
    fn competitions_resolve_topic_and_prune_by_timestamp() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        let listing = CompetitionListing {
            active_and_upcoming: vec![Competition { id: 5, topic_id: 13, ..Default::default() }],
            past: vec![Competition { id: 2, topic_id: 9, ..Default::default() }],
        };
        s.save_competitions(&listing).unwrap();
        s.save_competitions(&listing).unwrap();
        assert_eq!(s.resolve_competition_id("13").unwrap().as_deref(), Some("5"));
        assert_eq!(s.resolve_competition_id("9").unwrap().as_deref(), Some("2"));
        assert!(s.resolve_competition_id("4").unwrap().is_none());
        assert!(s.resolve_competition_id("not-a-number").unwrap().is_none());
        assert_eq!(s.db_stats().unwrap().competitions, 2);

        s.save_record(&record("13", "100", "90", 0)).unwrap();
        let removed = s.prune_older_than(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()).unwrap();
        assert_eq!(removed, 1, "competitions were saved just now and survive");
        assert_eq!(s.topic_stats("13").unwrap().count, 0);
    }

    #[test]
    fn fractional_block_times_sort_with_whole_seconds() {
        assert_eq!(normalize_ts("2025-02-01T10:00:00.123456789Z"), "2025-02-01T10:00:00.123Z");
        assert_eq!(normalize_ts("2025-02-01T12:00:00+02:00"), "2025-02-01T10:00:00.000Z");
        assert_eq!(normalize_ts("garbage"), "garbage");
    }
}
