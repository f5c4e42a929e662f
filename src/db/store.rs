//! SQLite database store implementation.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Fixed-width so that text order equals time order.
const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const RECORD_COLUMNS: &str = "id, timestamp, request_payload, response_data, status_code, \
     response_time_ms, content_type, content_length, request_type";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("storage unavailable")]
    Unavailable,
}

/// Thread-safe database store. Once closed, every call fails with
/// [`DbError::Unavailable`].
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, DbError> {
        self.conn.lock().map_err(|_| DbError::Unavailable)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(DbError::Unavailable)?;
        f(conn)
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&self) {
        match self.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    tracing::info!("Store: database closed");
                }
            }
            Err(e) => tracing::warn!("Store: close failed: {}", e),
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    // --- Probe Records ---

    /// Insert a record and return its id. Ids increase with insertion order.
    pub fn insert(&self, record: &NewProbeRecord) -> Result<i64, DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO probe_records (timestamp, request_payload, response_data, status_code, response_time_ms, content_type, content_length, request_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    format_db_time(&record.timestamp),
                    record.request_payload,
                    record.response_data,
                    record.status_code,
                    to_sql_int(record.response_time_ms),
                    record.content_type,
                    record.content_length.map(to_sql_int),
                    record.request_type.as_str(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Get one page of records matching `filter`, newest first.
    ///
    /// The count and the page are read under separate locks, so a concurrent
    /// insert may show up in one and not the other.
    pub fn query(
        &self,
        limit: u32,
        offset: u64,
        filter: &RecordFilter,
    ) -> Result<RecordPage, DbError> {
        let (where_sql, mut values) = build_where(filter);

        let total: i64 = self.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM probe_records{}", where_sql);
            Ok(conn.query_row(&sql, params_from_iter(values.iter()), |r| r.get(0))?)
        })?;

        values.push(Value::Integer(i64::from(limit)));
        values.push(Value::Integer(to_sql_int(offset)));

        let records = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM probe_records{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
                RECORD_COLUMNS, where_sql
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        Ok(RecordPage {
            records,
            total: total.max(0) as u64,
        })
    }

    /// Get every record from the last `window_minutes`, newest first.
    pub fn recent(&self, window_minutes: i64) -> Result<Vec<ProbeRecord>, DbError> {
        self.since(Utc::now() - ChronoDuration::minutes(window_minutes))
    }

    /// Get every record at or after `cutoff`, newest first.
    pub fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<ProbeRecord>, DbError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM probe_records WHERE timestamp >= ?1 ORDER BY timestamp DESC, id DESC",
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![format_db_time(&cutoff)], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Aggregate statistics over the last `window_hours`.
    pub fn statistics(&self, window_hours: i64) -> Result<Statistics, DbError> {
        let cutoff = format_db_time(&(Utc::now() - ChronoDuration::hours(window_hours)));

        self.with_conn(|conn| {
            let (total, avg, successes): (i64, Option<f64>, Option<i64>) = conn.query_row(
                "SELECT COUNT(*), AVG(response_time_ms), SUM(CASE WHEN status_code < 400 THEN 1 ELSE 0 END)
                 FROM probe_records WHERE timestamp >= ?1",
                params![cutoff],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT status_code, COUNT(*) FROM probe_records WHERE timestamp >= ?1 GROUP BY status_code",
            )?;
            let distribution = stmt
                .query_map(params![cutoff], |r| {
                    let code: u16 = r.get(0)?;
                    let count: i64 = r.get(1)?;
                    Ok((code, count.max(0) as u64))
                })?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

            let total = total.max(0) as u64;
            let success_rate_percent = if total == 0 {
                0
            } else {
                (100.0 * successes.unwrap_or(0) as f64 / total as f64).round() as u64
            };

            Ok(Statistics {
                total_requests: total,
                average_response_time_ms: avg.map(|a| a.round() as u64).unwrap_or(0),
                success_rate_percent,
                status_code_distribution: distribution,
            })
        })
    }
}

fn build_where(filter: &RecordFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(code) = filter.status_code {
        clauses.push("status_code = ?");
        values.push(Value::Integer(i64::from(code)));
    }
    if let Some(min) = filter.min_response_time_ms {
        clauses.push("response_time_ms >= ?");
        values.push(Value::Integer(to_sql_int(min)));
    }
    if let Some(max) = filter.max_response_time_ms {
        clauses.push("response_time_ms <= ?");
        values.push(Value::Integer(to_sql_int(max)));
    }
    if let Some(start) = &filter.start_time {
        clauses.push("timestamp >= ?");
        values.push(Value::Text(format_db_time(start)));
    }
    if let Some(end) = &filter.end_time {
        clauses.push("timestamp <= ?");
        values.push(Value::Text(format_db_time(end)));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ProbeRecord> {
    let time_str: String = row.get(1)?;
    let response_time_ms: i64 = row.get(5)?;
    let content_length: Option<i64> = row.get(7)?;
    let request_type: String = row.get(8)?;
    let timestamp = parse_db_time(&time_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("unparseable timestamp {:?}", time_str).into(),
        )
    })?;

    Ok(ProbeRecord {
        id: row.get(0)?,
        timestamp,
        request_payload: row.get(2)?,
        response_data: row.get(3)?,
        status_code: row.get(4)?,
        response_time_ms: response_time_ms.max(0) as u64,
        content_type: row.get(6)?,
        content_length: content_length.map(|l| l.max(0) as u64),
        request_type: RequestType::parse(&request_type),
    })
}

fn to_sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn format_db_time(dt: &DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [DB_TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    // Try ISO 8601
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn record(status_code: u16, response_time_ms: u64, timestamp: DateTime<Utc>) -> NewProbeRecord {
        NewProbeRecord {
            timestamp,
            request_payload: r#"{"requestId":"req_test"}"#.to_string(),
            response_data: "{}".to_string(),
            status_code,
            response_time_ms,
            content_type: Some("application/json".to_string()),
            content_length: Some(2),
            request_type: RequestType::Auto,
        }
    }

    #[test]
    fn test_ids_follow_insertion_order() {
        let (_tmp, store) = open();
        let now = Utc::now();

        let ids: Vec<i64> = (0..25)
            .map(|i| store.insert(&record(200, i, now)).unwrap())
            .collect();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        // Same timestamp everywhere, so id breaks the tie: newest first.
        let page = store.query(100, 0, &RecordFilter::default()).unwrap();
        let listed: Vec<i64> = page.records.iter().map(|r| r.id).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_concurrent_inserts_get_unique_ids() {
        let (_tmp, store) = open();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..20)
                        .map(|_| store.insert(&record(200, 10, Utc::now())).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for h in handles {
            let ids = h.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 80);
    }

    #[test]
    fn test_round_trip_fields() {
        let (_tmp, store) = open();
        let mut rec = record(0, 1234, Utc::now());
        rec.content_type = None;
        rec.content_length = None;
        rec.request_type = RequestType::Manual;
        let id = store.insert(&rec).unwrap();

        let page = store.query(10, 0, &RecordFilter::default()).unwrap();
        let fetched = &page.records[0];
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.status_code, 0);
        assert_eq!(fetched.response_time_ms, 1234);
        assert_eq!(fetched.content_type, None);
        assert_eq!(fetched.content_length, None);
        assert_eq!(fetched.request_type, RequestType::Manual);
        assert_eq!(fetched.timestamp, rec.timestamp);
    }

    #[test]
    fn test_status_filter_and_total() {
        let (_tmp, store) = open();
        let now = Utc::now();
        for code in [200, 404, 200, 404, 500, 404] {
            store.insert(&record(code, 50, now)).unwrap();
        }

        let filter = RecordFilter {
            status_code: Some(404),
            ..Default::default()
        };
        let page = store.query(2, 0, &filter).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.records.len(), 2);
        assert!(page.records.iter().all(|r| r.status_code == 404));

        let rest = store.query(2, 2, &filter).unwrap();
        assert_eq!(rest.total, 3);
        assert_eq!(rest.records.len(), 1);
        assert_eq!(rest.records[0].status_code, 404);
    }

    #[test]
    fn test_response_time_and_time_range_filters() {
        let (_tmp, store) = open();
        let base = Utc::now() - ChronoDuration::hours(3);
        for (i, ms) in [100u64, 200, 300, 400].iter().enumerate() {
            store
                .insert(&record(200, *ms, base + ChronoDuration::hours(i as i64)))
                .unwrap();
        }

        let filter = RecordFilter {
            min_response_time_ms: Some(200),
            max_response_time_ms: Some(300),
            ..Default::default()
        };
        let page = store.query(10, 0, &filter).unwrap();
        let times: Vec<u64> = page.records.iter().map(|r| r.response_time_ms).collect();
        assert_eq!(times, vec![300, 200]);

        // Both time bounds are inclusive.
        let filter = RecordFilter {
            start_time: Some(base + ChronoDuration::hours(1)),
            end_time: Some(base + ChronoDuration::hours(2)),
            ..Default::default()
        };
        let page = store.query(10, 0, &filter).unwrap();
        assert_eq!(page.total, 2);
        let times: Vec<u64> = page.records.iter().map(|r| r.response_time_ms).collect();
        assert_eq!(times, vec![300, 200]);
    }

    #[test]
    fn test_pagination_boundary() {
        let (_tmp, store) = open();
        store.insert(&record(200, 10, Utc::now())).unwrap();
        store.insert(&record(200, 20, Utc::now())).unwrap();

        let page = store.query(1, 0, &RecordFilter::default()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_recent_window() {
        let (_tmp, store) = open();
        let now = Utc::now();
        store.insert(&record(200, 1, now - ChronoDuration::minutes(90))).unwrap();
        let a = store.insert(&record(200, 2, now - ChronoDuration::minutes(30))).unwrap();
        let b = store.insert(&record(200, 3, now - ChronoDuration::minutes(5))).unwrap();

        let recent = store.recent(60).unwrap();
        let ids: Vec<i64> = recent.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn test_statistics() {
        let (_tmp, store) = open();
        let now = Utc::now();
        store.insert(&record(200, 100, now)).unwrap();
        store.insert(&record(200, 200, now)).unwrap();
        store.insert(&record(500, 300, now)).unwrap();
        // Outside the window.
        store.insert(&record(503, 9000, now - ChronoDuration::hours(30))).unwrap();

        let stats = store.statistics(24).unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.average_response_time_ms, 200);
        assert_eq!(stats.success_rate_percent, 67);
        assert_eq!(stats.status_code_distribution, BTreeMap::from([(200, 2), (500, 1)]));
    }

    #[test]
    fn test_statistics_empty() {
        let (_tmp, store) = open();
        let stats = store.statistics(24).unwrap();
        assert_eq!(stats, Statistics::default());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_tmp, store) = open();
        assert!(store.is_open());
        store.close();
        store.close();
        assert!(!store.is_open());

        assert!(matches!(
            store.insert(&record(200, 1, Utc::now())),
            Err(DbError::Unavailable)
        ));
        assert!(matches!(
            store.query(10, 0, &RecordFilter::default()),
            Err(DbError::Unavailable)
        ));
        assert!(matches!(store.recent(60), Err(DbError::Unavailable)));
        assert!(matches!(store.statistics(24), Err(DbError::Unavailable)));
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let (_tmp, store) = open();
        store.insert(&record(200, 10, Utc::now())).unwrap();
        store
            .with_conn(|conn| {
                conn.execute("UPDATE probe_records SET timestamp = 'not a time'", [])?;
                Ok(())
            })
            .unwrap();

        let err = store.query(10, 0, &RecordFilter::default()).unwrap_err();
        assert!(matches!(
            err,
            DbError::Sqlite(rusqlite::Error::FromSqlConversionFailure(1, Type::Text, _))
        ));
    }

    #[test]
    fn test_parse_db_time_formats() {
        let dt = parse_db_time("2024-01-01 12:34:56.123456789").unwrap();
        assert_eq!(format_db_time(&dt), "2024-01-01 12:34:56.123456789");
        assert!(parse_db_time("2024-01-01 12:34:56").is_some());
        assert!(parse_db_time("2024-01-01T12:34:56Z").is_some());
        assert!(parse_db_time("yesterday").is_none());
    }
}
