use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    AppSettings, Article, Feed, LogLevel, NewFeed, NewNewsletter, Newsletter, NewsletterType,
    NormalizedItem, Quote, RankedItem, Run, RunLogEntry, RunStatus, Verbosity,
};

use super::schema::SCHEMA;

/// Counts reported by a windowed seen-hash reset, for operator confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetReport {
    pub before: u64,
    pub deleted: u64,
    pub after: u64,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    /// In-memory store for tests.
    pub async fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Run a write closure, retrying transient busy/locked failures.
    async fn call_write<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut rusqlite::Connection) -> rusqlite::Result<T> + Clone + Send + 'static,
    {
        let mut attempt = 0;
        loop {
            let f = f.clone();
            match self.conn.call(move |conn| f(conn).map_err(Into::into)).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < 2 && is_transient(&e) => {
                    attempt += 1;
                    tracing::warn!("transient database error, retrying: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // Newsletter operations

    pub async fn insert_newsletter(&self, newsletter: NewNewsletter) -> Result<i64> {
        if newsletter.slug.is_empty()
            || !newsletter
                .slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(AppError::InvalidSetting {
                key: "slug".to_string(),
                reason: format!("'{}' must match [a-z0-9-]+", newsletter.slug),
            });
        }
        let times = serde_json::to_string(&newsletter.schedule_times)?;
        let id = self
            .call_write(move |conn| {
                conn.execute(
                    r#"INSERT INTO newsletters
                       (slug, name, timezone, schedule_times, include_watchlist, newsletter_type, verbosity, custom_prompt, created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"#,
                    params![
                        newsletter.slug,
                        newsletter.name,
                        newsletter.timezone,
                        times,
                        newsletter.include_watchlist,
                        newsletter.newsletter_type.as_str(),
                        newsletter.verbosity.as_str(),
                        newsletter.custom_prompt,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_newsletter(&self, id: i64) -> Result<Option<Newsletter>> {
        let newsletter = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE id = ?1"
                ))?;
                let row = stmt
                    .query_row(params![id], |row| Ok(newsletter_from_row(row)))
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(newsletter)
    }

    pub async fn get_newsletter_by_slug(&self, slug: &str) -> Result<Option<Newsletter>> {
        let slug = slug.to_string();
        let newsletter = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE slug = ?1"
                ))?;
                let row = stmt
                    .query_row(params![slug], |row| Ok(newsletter_from_row(row)))
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(newsletter)
    }

    pub async fn list_active_newsletters(&self) -> Result<Vec<Newsletter>> {
        let newsletters = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE active = 1 ORDER BY id"
                ))?;
                let rows = stmt
                    .query_map([], |row| Ok(newsletter_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(newsletters)
    }

    pub async fn set_newsletter_active(&self, id: i64, active: bool) -> Result<()> {
        self.call_write(move |conn| {
            conn.execute(
                "UPDATE newsletters SET active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active, Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
        .await
    }

    // Feed and watchlist operations

    pub async fn insert_feed(&self, feed: NewFeed) -> Result<i64> {
        let id = self
            .call_write(move |conn| {
                conn.execute(
                    r#"INSERT INTO feeds (newsletter_id, url, title, category, order_index)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![feed.newsletter_id, feed.url, feed.title, feed.category, feed.order_index],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Enabled feeds in display order. Disabled feeds are retained but skipped.
    pub async fn enabled_feeds(&self, newsletter_id: i64) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, newsletter_id, url, title, category, enabled, order_index
                       FROM feeds WHERE newsletter_id = ?1 AND enabled = 1
                       ORDER BY order_index, id"#,
                )?;
                let rows = stmt
                    .query_map(params![newsletter_id], |row| Ok(feed_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn add_watchlist_symbol(&self, newsletter_id: i64, symbol: &str) -> Result<()> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(AppError::InvalidSetting {
                key: "watchlist_symbol".to_string(),
                reason: format!("'{symbol}' is not a valid ticker"),
            });
        }
        self.call_write(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO watchlist_symbols (newsletter_id, symbol) VALUES (?1, ?2)",
                params![newsletter_id, symbol],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn watchlist(&self, newsletter_id: i64) -> Result<Vec<String>> {
        let symbols = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT symbol FROM watchlist_symbols WHERE newsletter_id = ?1 ORDER BY symbol",
                )?;
                let rows = stmt
                    .query_map(params![newsletter_id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(symbols)
    }

    // Dedupe (seen set) and article admission

    /// Filter items through the newsletter's seen set in one transaction.
    ///
    /// Every previously-unseen item is marked seen and gets an article row
    /// (first-seen-wins on `content_hash`); the admitted items come back with
    /// their article ids, in input order. Previously-seen items are dropped.
    pub async fn admit_items(
        &self,
        newsletter_id: i64,
        items: Vec<NormalizedItem>,
    ) -> Result<Vec<(NormalizedItem, i64)>> {
        let now = Utc::now().to_rfc3339();
        let admitted = self
            .call_write(move |conn| {
                let tx = conn.transaction()?;
                let mut admitted = Vec::new();
                for item in &items {
                    let seen: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM seen_hashes WHERE content_hash = ?1 AND newsletter_id = ?2",
                        params![item.content_hash, newsletter_id],
                        |row| row.get(0),
                    )?;
                    if seen > 0 {
                        continue;
                    }
                    tx.execute(
                        "INSERT INTO seen_hashes (content_hash, newsletter_id, first_seen_at) VALUES (?1, ?2, ?3)",
                        params![item.content_hash, newsletter_id, now],
                    )?;
                    tx.execute(
                        r#"INSERT OR IGNORE INTO articles (content_hash, source, title, canonical_url, published_at)
                           VALUES (?1, ?2, ?3, ?4, ?5)"#,
                        params![
                            item.content_hash,
                            item.source,
                            item.title,
                            item.canonical_url,
                            item.published_at.map(|dt| dt.to_rfc3339()),
                        ],
                    )?;
                    let article_id: i64 = tx.query_row(
                        "SELECT id FROM articles WHERE content_hash = ?1",
                        params![item.content_hash],
                        |row| row.get(0),
                    )?;
                    admitted.push((item.clone(), article_id));
                }
                tx.commit()?;
                Ok(admitted)
            })
            .await?;
        Ok(admitted)
    }

    /// Delete seen-hash rows first seen within the trailing window and report
    /// `{before, deleted, after}` counts inside that window.
    pub async fn reset_seen(&self, newsletter_id: i64, hours: u32) -> Result<ResetReport> {
        if !(1..=168).contains(&hours) {
            return Err(anyhow::anyhow!("reset window must be within 1..=168 hours").into());
        }
        let cutoff = (Utc::now() - chrono::Duration::hours(hours as i64)).to_rfc3339();
        let report = self
            .call_write(move |conn| {
                let tx = conn.transaction()?;
                let before: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM seen_hashes WHERE newsletter_id = ?1 AND first_seen_at >= ?2",
                    params![newsletter_id, cutoff],
                    |row| row.get(0),
                )?;
                let deleted = tx.execute(
                    "DELETE FROM seen_hashes WHERE newsletter_id = ?1 AND first_seen_at >= ?2",
                    params![newsletter_id, cutoff],
                )? as u64;
                let after: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM seen_hashes WHERE newsletter_id = ?1 AND first_seen_at >= ?2",
                    params![newsletter_id, cutoff],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(ResetReport {
                    before: before as u64,
                    deleted,
                    after: after as u64,
                })
            })
            .await?;
        Ok(report)
    }

    // Run lifecycle

    pub async fn create_run(&self, newsletter_id: i64) -> Result<Run> {
        let run = Run {
            run_id: Uuid::new_v4(),
            newsletter_id,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Started,
            feeds_total: 0,
            feeds_ok: 0,
            articles_seen: 0,
            articles_used: 0,
            ai_tokens_in: 0,
            ai_tokens_out: 0,
            ai_provider_label: None,
            email_sent: false,
            error: None,
        };
        let insert = run.clone();
        self.call_write(move |conn| {
            conn.execute(
                "INSERT INTO runs (run_id, newsletter_id, started_at, status) VALUES (?1, ?2, ?3, ?4)",
                params![
                    insert.run_id.to_string(),
                    insert.newsletter_id,
                    insert.started_at.to_rfc3339(),
                    insert.status.as_str(),
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(run)
    }

    /// Terminal transition: writes every counter and the final status in one
    /// statement, after which the run row is never touched again.
    pub async fn finish_run(&self, run: &Run) -> Result<()> {
        let run = run.clone();
        self.call_write(move |conn| {
            conn.execute(
                r#"UPDATE runs SET
                       finished_at = ?1, status = ?2, feeds_total = ?3, feeds_ok = ?4,
                       articles_seen = ?5, articles_used = ?6, ai_tokens_in = ?7,
                       ai_tokens_out = ?8, ai_provider_label = ?9, email_sent = ?10, error = ?11
                   WHERE run_id = ?12"#,
                params![
                    run.finished_at.map(|dt| dt.to_rfc3339()),
                    run.status.as_str(),
                    run.feeds_total,
                    run.feeds_ok,
                    run.articles_seen,
                    run.articles_used,
                    run.ai_tokens_in as i64,
                    run.ai_tokens_out as i64,
                    run.ai_provider_label,
                    run.email_sent,
                    run.error,
                    run.run_id.to_string(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        let run_id = run_id.to_string();
        let run = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"))?;
                let row = stmt
                    .query_row(params![run_id], |row| Ok(run_from_row(row)))
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(run)
    }

    pub async fn list_runs(&self, newsletter_id: i64, limit: u32) -> Result<Vec<Run>> {
        let runs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE newsletter_id = ?1 ORDER BY started_at DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![newsletter_id, limit], |row| Ok(run_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(runs)
    }

    /// Persist the accepted items of a run with their 1-based ranks.
    pub async fn record_selection(&self, run_id: Uuid, ranked: &[RankedItem]) -> Result<()> {
        let run_id = run_id.to_string();
        let rows: Vec<(i64, u32, f64)> =
            ranked.iter().map(|r| (r.article_id, r.rank, r.score)).collect();
        self.call_write(move |conn| {
            let tx = conn.transaction()?;
            for (article_id, rank, score) in &rows {
                tx.execute(
                    "INSERT INTO run_articles (run_id, article_id, rank, score) VALUES (?1, ?2, ?3, ?4)",
                    params![run_id, article_id, rank, score],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// The selected articles of a run with their ranks and scores.
    pub async fn articles_for_run(&self, run_id: Uuid) -> Result<Vec<(Article, u32, f64)>> {
        let run_id = run_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT a.id, a.content_hash, a.source, a.title, a.canonical_url, a.published_at,
                              ra.rank, ra.score
                       FROM run_articles ra JOIN articles a ON a.id = ra.article_id
                       WHERE ra.run_id = ?1 ORDER BY ra.rank"#,
                )?;
                let rows = stmt
                    .query_map(params![run_id], |row| {
                        Ok((article_from_row(row), row.get(6)?, row.get(7)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    // Market data

    pub async fn upsert_quote(&self, run_id: Uuid, quote: &Quote) -> Result<()> {
        let run_id = run_id.to_string();
        let quote = quote.clone();
        self.call_write(move |conn| {
            conn.execute(
                r#"INSERT INTO market_data (run_id, symbol, price, change_amount, change_percent, captured_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                   ON CONFLICT(run_id, symbol) DO UPDATE SET
                       price = excluded.price,
                       change_amount = excluded.change_amount,
                       change_percent = excluded.change_percent,
                       captured_at = excluded.captured_at"#,
                params![
                    run_id,
                    quote.symbol,
                    quote.price,
                    quote.change_amount,
                    quote.change_percent,
                    quote.captured_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn quotes_for_run(&self, run_id: Uuid) -> Result<Vec<Quote>> {
        let run_id = run_id.to_string();
        let quotes = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT symbol, price, change_amount, change_percent, captured_at
                       FROM market_data WHERE run_id = ?1 ORDER BY symbol"#,
                )?;
                let rows = stmt
                    .query_map(params![run_id], |row| Ok(quote_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(quotes)
    }

    // Digests

    pub async fn store_digest(&self, run_id: Uuid, subject: &str, html: &str) -> Result<()> {
        let run_id = run_id.to_string();
        let subject = subject.to_string();
        let html = html.to_string();
        self.call_write(move |conn| {
            conn.execute(
                r#"INSERT INTO digests (run_id, subject, html, created_at)
                   VALUES (?1, ?2, ?3, ?4)
                   ON CONFLICT(run_id) DO UPDATE SET subject = excluded.subject, html = excluded.html"#,
                params![run_id, subject, html, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn digest_for_run(&self, run_id: Uuid) -> Result<Option<(String, String)>> {
        let run_id = run_id.to_string();
        let digest = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT subject, html FROM digests WHERE run_id = ?1",
                        params![run_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(digest)
    }

    /// Most recently created digest across all newsletters (the `/latest` view).
    pub async fn latest_digest(&self) -> Result<Option<(String, String)>> {
        let digest = self
            .conn
            .call(|conn| {
                let row = conn
                    .query_row(
                        "SELECT subject, html FROM digests ORDER BY created_at DESC, run_id DESC LIMIT 1",
                        [],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(digest)
    }

    // Run logs

    pub async fn append_run_logs(&self, run_id: Uuid, entries: Vec<RunLogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let run_id = run_id.to_string();
        self.call_write(move |conn| {
            let tx = conn.transaction()?;
            for entry in &entries {
                tx.execute(
                    "INSERT INTO run_logs (run_id, ts, level, message, context_json) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        run_id,
                        entry.ts.to_rfc3339(),
                        entry.level.as_str(),
                        entry.message,
                        entry.context.as_ref().map(|c| c.to_string()),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn logs_for_run(&self, run_id: Uuid) -> Result<Vec<RunLogEntry>> {
        let run_id = run_id.to_string();
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT ts, level, message, context_json FROM run_logs WHERE run_id = ?1 ORDER BY ts, id",
                )?;
                let rows = stmt
                    .query_map(params![run_id], |row| Ok(run_log_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(entries)
    }

    /// Drop runs older than the retention horizon; cascades take the digest,
    /// selection, quote, and log rows with them.
    pub async fn prune_runs(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - chrono::Duration::days(older_than_days as i64)).to_rfc3339();
        let deleted = self
            .call_write(move |conn| {
                let n = conn.execute("DELETE FROM runs WHERE started_at < ?1", params![cutoff])?;
                Ok(n as u64)
            })
            .await?;
        Ok(deleted)
    }

    // Settings bag

    pub async fn settings_bag(&self) -> Result<HashMap<String, String>> {
        let bag = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM app_settings")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<std::result::Result<HashMap<_, _>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(bag)
    }

    pub async fn load_settings(&self) -> Result<AppSettings> {
        Ok(AppSettings::from_bag(&self.settings_bag().await?))
    }

    /// Validated write into the settings bag.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        AppSettings::validate(key, value)?;
        let key = key.to_string();
        let value = value.to_string();
        self.call_write(move |conn| {
            conn.execute(
                r#"INSERT INTO app_settings (key, value) VALUES (?1, ?2)
                   ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

fn is_transient(error: &tokio_rusqlite::Error) -> bool {
    matches!(
        error,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, _))
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

const NEWSLETTER_COLUMNS: &str = "id, slug, name, timezone, schedule_times, active, include_watchlist, newsletter_type, verbosity, custom_prompt, created_at, updated_at";

const RUN_COLUMNS: &str = "run_id, newsletter_id, started_at, finished_at, status, feeds_total, feeds_ok, articles_seen, articles_used, ai_tokens_in, ai_tokens_out, ai_provider_label, email_sent, error";

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn newsletter_from_row(row: &Row) -> Newsletter {
    let schedule_times: Vec<String> = row
        .get::<_, String>(4)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    Newsletter {
        id: row.get(0).unwrap(),
        slug: row.get(1).unwrap(),
        name: row.get(2).unwrap(),
        timezone: row.get(3).unwrap(),
        schedule_times,
        active: row.get::<_, i64>(5).unwrap() != 0,
        include_watchlist: row.get::<_, i64>(6).unwrap() != 0,
        newsletter_type: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| NewsletterType::parse(&s))
            .unwrap_or(NewsletterType::GeneralBusiness),
        verbosity: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| Verbosity::parse(&s))
            .unwrap_or_default(),
        custom_prompt: row.get(9).unwrap(),
        created_at: row
            .get::<_, String>(10)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(11)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn feed_from_row(row: &Row) -> Feed {
    Feed {
        id: row.get(0).unwrap(),
        newsletter_id: row.get(1).unwrap(),
        url: row.get(2).unwrap(),
        title: row.get(3).unwrap(),
        category: row.get(4).unwrap(),
        enabled: row.get::<_, i64>(5).unwrap() != 0,
        order_index: row.get(6).unwrap(),
    }
}

fn run_from_row(row: &Row) -> Run {
    Run {
        run_id: row
            .get::<_, String>(0)
            .ok()
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_default(),
        newsletter_id: row.get(1).unwrap(),
        started_at: row
            .get::<_, String>(2)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        finished_at: row
            .get::<_, Option<String>>(3)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        status: row
            .get::<_, String>(4)
            .ok()
            .and_then(|s| RunStatus::parse(&s))
            .unwrap_or(RunStatus::Failed),
        feeds_total: row.get(5).unwrap(),
        feeds_ok: row.get(6).unwrap(),
        articles_seen: row.get(7).unwrap(),
        articles_used: row.get(8).unwrap(),
        ai_tokens_in: row.get::<_, i64>(9).unwrap() as u64,
        ai_tokens_out: row.get::<_, i64>(10).unwrap() as u64,
        ai_provider_label: row.get(11).unwrap(),
        email_sent: row.get::<_, i64>(12).unwrap() != 0,
        error: row.get(13).unwrap(),
    }
}

fn article_from_row(row: &Row) -> Article {
    Article {
        id: row.get(0).unwrap(),
        content_hash: row.get(1).unwrap(),
        source: row.get(2).unwrap(),
        title: row.get(3).unwrap(),
        canonical_url: row.get(4).unwrap(),
        published_at: row
            .get::<_, Option<String>>(5)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
    }
}

fn quote_from_row(row: &Row) -> Quote {
    Quote {
        symbol: row.get(0).unwrap(),
        price: row.get(1).unwrap(),
        change_amount: row.get(2).unwrap(),
        change_percent: row.get(3).unwrap(),
        captured_at: row
            .get::<_, String>(4)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn run_log_from_row(row: &Row) -> RunLogEntry {
    RunLogEntry {
        ts: row
            .get::<_, String>(0)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        level: row
            .get::<_, String>(1)
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info),
        message: row.get(2).unwrap(),
        context: row
            .get::<_, Option<String>>(3)
            .unwrap()
            .and_then(|raw| serde_json::from_str(&raw).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedItem;

    async fn repo_with_newsletter() -> (Repository, i64) {
        let repo = Repository::new_in_memory().await.unwrap();
        let id = repo
            .insert_newsletter(NewNewsletter {
                slug: "daily-wire".to_string(),
                name: "Daily Wire".to_string(),
                timezone: "America/New_York".to_string(),
                schedule_times: vec!["06:30".to_string()],
                include_watchlist: true,
                newsletter_type: NewsletterType::Markets,
                verbosity: Verbosity::Medium,
                custom_prompt: String::new(),
            })
            .await
            .unwrap();
        (repo, id)
    }

    fn sample_item(n: u32) -> NormalizedItem {
        NormalizedItem {
            title: format!("Story {n}"),
            canonical_url: format!("https://example.com/{n}"),
            source: "example.com".to_string(),
            published_at: Some(Utc::now()),
            description: String::new(),
            content_hash: format!("hash-{n:04}"),
        }
    }

    #[tokio::test]
    async fn newsletter_round_trip() {
        let (repo, id) = repo_with_newsletter().await;
        let loaded = repo.get_newsletter(id).await.unwrap().unwrap();
        assert_eq!(loaded.slug, "daily-wire");
        assert_eq!(loaded.schedule_times, vec!["06:30"]);
        assert_eq!(loaded.newsletter_type, NewsletterType::Markets);
        assert!(loaded.active);

        let by_slug = repo.get_newsletter_by_slug("daily-wire").await.unwrap();
        assert!(by_slug.is_some());

        let bad_slug = repo
            .insert_newsletter(NewNewsletter {
                slug: "Daily Wire!".to_string(),
                name: "Bad".to_string(),
                timezone: "UTC".to_string(),
                schedule_times: vec![],
                include_watchlist: false,
                newsletter_type: NewsletterType::GeneralBusiness,
                verbosity: Verbosity::Low,
                custom_prompt: String::new(),
            })
            .await;
        assert!(bad_slug.is_err());

        repo.set_newsletter_active(id, false).await.unwrap();
        assert!(repo.list_active_newsletters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admit_items_filters_previously_seen() {
        let (repo, id) = repo_with_newsletter().await;
        let items = vec![sample_item(1), sample_item(2)];

        let first = repo.admit_items(id, items.clone()).await.unwrap();
        assert_eq!(first.len(), 2);

        // Same hashes again: everything is suppressed.
        let second = repo.admit_items(id, items).await.unwrap();
        assert!(second.is_empty());

        // A second newsletter has its own seen set.
        let other = repo
            .insert_newsletter(NewNewsletter {
                slug: "other".to_string(),
                name: "Other".to_string(),
                timezone: "UTC".to_string(),
                schedule_times: vec![],
                include_watchlist: false,
                newsletter_type: NewsletterType::GeneralBusiness,
                verbosity: Verbosity::Low,
                custom_prompt: String::new(),
            })
            .await
            .unwrap();
        let cross = repo.admit_items(other, vec![sample_item(1)]).await.unwrap();
        assert_eq!(cross.len(), 1);
        // Article row is shared (first-seen-wins), not duplicated.
        assert_eq!(cross[0].1, first[0].1);
    }

    #[tokio::test]
    async fn reset_seen_reports_window_counts() {
        let (repo, id) = repo_with_newsletter().await;
        repo.admit_items(id, vec![sample_item(1), sample_item(2), sample_item(3)])
            .await
            .unwrap();

        let report = repo.reset_seen(id, 24).await.unwrap();
        assert_eq!(
            report,
            ResetReport {
                before: 3,
                deleted: 3,
                after: 0
            }
        );

        // Items reappear on the next admission pass.
        let readmitted = repo.admit_items(id, vec![sample_item(1)]).await.unwrap();
        assert_eq!(readmitted.len(), 1);

        assert!(repo.reset_seen(id, 0).await.is_err());
        assert!(repo.reset_seen(id, 169).await.is_err());
    }

    #[tokio::test]
    async fn run_lifecycle_and_introspection() {
        let (repo, id) = repo_with_newsletter().await;
        let mut run = repo.create_run(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Started);

        let admitted = repo.admit_items(id, vec![sample_item(1)]).await.unwrap();
        let ranked = vec![RankedItem {
            item: admitted[0].0.clone(),
            article_id: admitted[0].1,
            rank: 1,
            score: 45.0,
        }];
        repo.record_selection(run.run_id, &ranked).await.unwrap();

        run.status = RunStatus::Success;
        run.finished_at = Some(Utc::now());
        run.feeds_total = 2;
        run.feeds_ok = 2;
        run.articles_seen = 1;
        run.articles_used = 1;
        run.email_sent = true;
        repo.finish_run(&run).await.unwrap();

        let loaded = repo.get_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Success);
        assert_eq!(loaded.feeds_ok, 2);
        assert!(loaded.email_sent);

        let selection = repo.articles_for_run(run.run_id).await.unwrap();
        assert_eq!(selection.len(), 1);
        let (article, rank, score) = &selection[0];
        assert_eq!(article.id, admitted[0].1);
        assert_eq!(article.title, "Story 1");
        assert_eq!((*rank, *score), (1, 45.0));

        let listed = repo.list_runs(id, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn digests_quotes_and_logs_round_trip() {
        let (repo, id) = repo_with_newsletter().await;
        let run = repo.create_run(id).await.unwrap();

        repo.store_digest(run.run_id, "Subject", "<html>one</html>").await.unwrap();
        let (subject, html) = repo.digest_for_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(subject, "Subject");
        assert_eq!(html, "<html>one</html>");
        assert!(repo.latest_digest().await.unwrap().is_some());

        let quote = Quote {
            symbol: "AAPL".to_string(),
            price: 212.4,
            change_amount: -1.2,
            change_percent: -0.56,
            captured_at: Utc::now(),
        };
        repo.upsert_quote(run.run_id, &quote).await.unwrap();
        repo.upsert_quote(run.run_id, &quote).await.unwrap();
        let quotes = repo.quotes_for_run(run.run_id).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "AAPL");

        repo.append_run_logs(
            run.run_id,
            vec![RunLogEntry {
                ts: Utc::now(),
                level: LogLevel::Warn,
                message: "feed.unreachable".to_string(),
                context: Some(serde_json::json!({"url": "https://x"})),
            }],
        )
        .await
        .unwrap();
        let logs = repo.logs_for_run(run.run_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Warn);
        assert!(logs[0].context.is_some());
    }

    #[tokio::test]
    async fn settings_bag_round_trip_and_validation() {
        let (repo, _) = repo_with_newsletter().await;
        repo.set_setting("per_source_cap", "5").await.unwrap();
        repo.set_setting("reasoning_level", "high").await.unwrap();
        assert!(repo.set_setting("reasoning_level", "ultra").await.is_err());

        let settings = repo.load_settings().await.unwrap();
        assert_eq!(settings.per_source_cap, 5);
        assert_eq!(settings.reasoning_level, crate::models::ReasoningLevel::High);
    }

    #[tokio::test]
    async fn prune_runs_respects_retention() {
        let (repo, id) = repo_with_newsletter().await;
        let run = repo.create_run(id).await.unwrap();
        // A fresh run survives a 30-day retention pass.
        assert_eq!(repo.prune_runs(30).await.unwrap(), 0);
        assert!(repo.get_run(run.run_id).await.unwrap().is_some());
    }
}
