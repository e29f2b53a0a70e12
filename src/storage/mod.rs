use crate::models::{AggregationResult, ProfileMetricRow};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::{params, Connection};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS profile_metrics (
    request_id                  VARCHAR  NOT NULL DEFAULT '',
    username                    VARCHAR  NOT NULL,
    display_name                VARCHAR  NOT NULL,
    -- account-level cumulative counters at fetch time
    total_likes                 DOUBLE,
    followers_count             DOUBLE,
    processed_at                TIMESTAMP NOT NULL,
    metrics_date                DATE,
    metrics_video_views         DOUBLE,
    metrics_unique_video_views  DOUBLE,
    metrics_profile_views       DOUBLE,
    metrics_comments            DOUBLE,
    metrics_shares              DOUBLE,
    metrics_engaged_audience    DOUBLE,
    metrics_bio_link_clicks     DOUBLE
);

CREATE TABLE IF NOT EXISTS aggregation_results (
    username        VARCHAR  NOT NULL,
    display_name    VARCHAR  NOT NULL,
    start_date      DATE     NOT NULL,
    end_date        DATE     NOT NULL,
    date_range      VARCHAR  NOT NULL,
    days_in_range   INTEGER  NOT NULL,
    record_json     VARCHAR  NOT NULL,
    created_at      TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS fetch_run_ids START 1;

CREATE TABLE IF NOT EXISTS fetch_runs (
    id              INTEGER PRIMARY KEY DEFAULT nextval('fetch_run_ids'),
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    periods         INTEGER DEFAULT 0,
    rows_loaded     INTEGER DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_metrics_date ON profile_metrics (metrics_date);
CREATE INDEX IF NOT EXISTS idx_metrics_user ON profile_metrics (username);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Daily rows ────────────────────────────────────────────────────────────

    /// Append flattened daily rows. No dedup: re-loading a payload adds rows again.
    pub fn append_profile_rows(&self, rows: &[ProfileMetricRow]) -> Result<usize> {
        if rows.is_empty() { return Ok(0); }

        let tx = self.conn.unchecked_transaction()?;
        insert_rows(&tx, rows)?;
        tx.commit()?;
        Ok(rows.len())
    }

    /// Daily rows and the period's result in one transaction.
    pub fn append_period(&self, rows: &[ProfileMetricRow], result: &AggregationResult) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        insert_rows(&tx, rows)?;
        insert_aggregation(&tx, result)?;
        tx.commit()?;
        Ok(rows.len())
    }

    /// Rows with `metrics_date >= since`, ordered by account then day.
    pub fn rows_since(&self, since: NaiveDate) -> Result<Vec<ProfileMetricRow>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT request_id, username, display_name, total_likes, followers_count,
                      processed_at, metrics_date,
                      metrics_video_views, metrics_unique_video_views, metrics_profile_views,
                      metrics_comments, metrics_shares, metrics_engaged_audience,
                      metrics_bio_link_clicks
               FROM profile_metrics
               WHERE metrics_date >= ?
               ORDER BY username, metrics_date ASC"#,
        )?;

        let rows = stmt
            .query_map(params![since], |r| {
                Ok(ProfileMetricRow {
                    request_id: r.get(0)?,
                    username: r.get(1)?,
                    display_name: r.get(2)?,
                    total_likes: r.get(3)?,
                    followers_count: r.get(4)?,
                    processed_at: r.get(5)?,
                    metrics_date: r.get(6)?,
                    video_views: r.get(7)?,
                    unique_video_views: r.get(8)?,
                    profile_views: r.get(9)?,
                    comments: r.get(10)?,
                    shares: r.get(11)?,
                    engaged_audience: r.get(12)?,
                    bio_link_clicks: r.get(13)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn row_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM profile_metrics")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn account_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(DISTINCT username) FROM profile_metrics")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self
            .conn
            .prepare("SELECT MIN(metrics_date), MAX(metrics_date) FROM profile_metrics")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Aggregation results ───────────────────────────────────────────────────

    pub fn aggregation_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM aggregation_results")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Fetch run log ─────────────────────────────────────────────────────────

    pub fn begin_fetch_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO fetch_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_fetch_run(
        &self, run_id: i64, periods: usize, rows: usize, error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE fetch_runs SET
               finished_at = ?, status = ?,
               periods = ?, rows_loaded = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                periods as i64, rows as i64, error, run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run_status(&self) -> Result<Option<String>> {
        let mut s = self
            .conn
            .prepare("SELECT status FROM fetch_runs ORDER BY id DESC LIMIT 1")?;
        let mut rows = s.query([])?;
        match rows.next()? {
            Some(r) => Ok(Some(r.get(0)?)),
            None => Ok(None),
        }
    }
}

// ── Inserts ───────────────────────────────────────────────────────────────────

fn insert_rows(conn: &Connection, rows: &[ProfileMetricRow]) -> Result<()> {
    let sql = r#"
        INSERT INTO profile_metrics
            (request_id, username, display_name, total_likes, followers_count,
             processed_at, metrics_date,
             metrics_video_views, metrics_unique_video_views, metrics_profile_views,
             metrics_comments, metrics_shares, metrics_engaged_audience,
             metrics_bio_link_clicks)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#;

    for row in rows {
        conn.execute(sql, params![
            row.request_id, row.username, row.display_name,
            row.total_likes, row.followers_count,
            row.processed_at, row.metrics_date,
            row.video_views, row.unique_video_views, row.profile_views,
            row.comments, row.shares, row.engaged_audience,
            row.bio_link_clicks,
        ]).with_context(|| format!("insert row {} {:?}", row.username, row.metrics_date))?;
    }
    Ok(())
}

fn insert_aggregation(conn: &Connection, result: &AggregationResult) -> Result<()> {
    let json = serde_json::to_string(result)?;
    conn.execute(
        r#"INSERT INTO aggregation_results
           (username, display_name, start_date, end_date, date_range,
            days_in_range, record_json, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        params![
            result.username, result.display_name,
            result.range.start(), result.range.end(), result.date_range,
            result.days_in_range as i64, json,
            Utc::now().naive_utc(),
        ],
    ).with_context(|| format!("insert aggregation {}", result.date_range))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DateRange, Increase, IncreaseMetric};
    use chrono::NaiveDateTime;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 28).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn row(user: &str, date: (i32, u32, u32), views: f64) -> ProfileMetricRow {
        ProfileMetricRow {
            request_id: "req-1".into(),
            username: user.into(),
            display_name: user.to_uppercase(),
            total_likes: Some(3000.0),
            followers_count: Some(1124.0),
            processed_at: at(),
            metrics_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            video_views: Some(views),
            unique_video_views: None,
            profile_views: Some(1.0),
            comments: None,
            shares: Some(0.0),
            engaged_audience: None,
            bio_link_clicks: Some(2.0),
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.row_count().unwrap(), 0);
        assert_eq!(repo.date_range().unwrap(), (None, None));
    }

    #[test]
    fn test_append_is_not_deduplicated() {
        let repo = repo();
        let rows = vec![row("b_shop", (2024, 5, 26), 15.0), row("a_shop", (2024, 5, 25), 26.0)];

        assert_eq!(repo.append_profile_rows(&rows).unwrap(), 2);
        assert_eq!(repo.append_profile_rows(&rows).unwrap(), 2);
        assert_eq!(repo.row_count().unwrap(), 4);
        assert_eq!(repo.account_count().unwrap(), 2);
        assert_eq!(
            repo.date_range().unwrap(),
            (NaiveDate::from_ymd_opt(2024, 5, 25), NaiveDate::from_ymd_opt(2024, 5, 26))
        );
    }

    #[test]
    fn test_rows_since_filters_and_orders() {
        let repo = repo();
        repo.append_profile_rows(&[
            row("b_shop", (2024, 5, 27), 19.0),
            row("a_shop", (2024, 5, 20), 1.0),
            row("a_shop", (2024, 5, 26), 15.0),
            row("a_shop", (2024, 5, 25), 26.0),
        ])
        .unwrap();

        let rows = repo.rows_since(NaiveDate::from_ymd_opt(2024, 5, 25).unwrap()).unwrap();
        let keys: Vec<(String, Option<NaiveDate>)> =
            rows.iter().map(|r| (r.username.clone(), r.metrics_date)).collect();
        assert_eq!(
            keys,
            vec![
                ("a_shop".to_string(), NaiveDate::from_ymd_opt(2024, 5, 25)),
                ("a_shop".to_string(), NaiveDate::from_ymd_opt(2024, 5, 26)),
                ("b_shop".to_string(), NaiveDate::from_ymd_opt(2024, 5, 27)),
            ]
        );
        assert_eq!(rows[0].video_views, Some(26.0));
        assert_eq!(rows[0].comments, None);
        assert_eq!(rows[0].processed_at, at());
    }

    fn result() -> AggregationResult {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 5, 25).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 27).unwrap(),
        );
        AggregationResult {
            range,
            date_range: range.label(),
            username: "shop".into(),
            display_name: "Shop".into(),
            sums: vec![("video_views".into(), 40.0)],
            increases: vec![IncreaseMetric {
                name: "followers_count".into(),
                increase: Increase::Value(3.0),
                total: Some(500.0),
            }],
            days_in_range: 2,
        }
    }

    #[test]
    fn test_append_period_is_all_or_nothing() {
        let repo = repo();
        let rows = vec![row("shop", (2024, 5, 25), 26.0), row("shop", (2024, 5, 26), 15.0)];
        assert_eq!(repo.append_period(&rows, &result()).unwrap(), 2);
        assert_eq!(repo.row_count().unwrap(), 2);
        assert_eq!(repo.aggregation_count().unwrap(), 1);

        repo.conn.execute_batch("DROP TABLE aggregation_results").unwrap();
        assert!(repo.append_period(&rows, &result()).is_err());
        assert_eq!(repo.row_count().unwrap(), 2);
    }

    #[test]
    fn test_aggregation_and_run_log() {
        let repo = repo();
        repo.append_period(&[], &result()).unwrap();
        assert_eq!(repo.aggregation_count().unwrap(), 1);

        let id = repo.begin_fetch_run().unwrap();
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("running"));
        repo.finish_fetch_run(id, 2, 6, None).unwrap();
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("success"));

        let id2 = repo.begin_fetch_run().unwrap();
        assert!(id2 > id);
        repo.finish_fetch_run(id2, 2, 0, Some("1 errors")).unwrap();
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("error"));
    }
}
