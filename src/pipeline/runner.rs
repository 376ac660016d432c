use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use serde_json::json;

use crate::ai::{build_prompt, headlines_fallback, Cascade, HEADLINES_LABEL, SYSTEM_PROMPT};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{FeedFetcher, FetchErrorKind};
use crate::mail::{EmailMessage, Mailer};
use crate::market::{MarketDataClient, QuoteOutcome};
use crate::models::{
    AppSettings, Newsletter, Quote, RankedItem, Run, RunResult, RunStatus,
};
use crate::pipeline::{CancelFlag, RunRecorder};
use crate::render::{markdown_to_html, plain_text_alternative, render_digest, subject_line};
use crate::select::select_items;

const FEED_TIMEOUT: Duration = Duration::from_secs(10);
const RUN_DEADLINE: Duration = Duration::from_secs(8 * 60);

/// Per-newsletter serialization: at most one in-flight run, extra fires are
/// coalesced (skipped, never queued). Scheduled and manual runs share it.
#[derive(Debug, Clone, Default)]
pub struct RunGate {
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl RunGate {
    pub fn try_acquire(&self, newsletter_id: i64) -> Option<RunGuard> {
        let mut in_flight = self.in_flight.lock().expect("run gate lock");
        if !in_flight.insert(newsletter_id) {
            return None;
        }
        Some(RunGuard {
            newsletter_id,
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

pub struct RunGuard {
    newsletter_id: i64,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.in_flight.lock().expect("run gate lock").remove(&self.newsletter_id);
    }
}

/// The single-run orchestrator: fetch, normalize, dedupe, rank, quote,
/// prompt, cascade, render, deliver, record.
pub struct Pipeline {
    pub(crate) repo: Arc<Repository>,
    config: Arc<Config>,
    gate: RunGate,
}

impl Pipeline {
    pub fn new(repo: Arc<Repository>, config: Arc<Config>) -> Self {
        Self {
            repo,
            config,
            gate: RunGate::default(),
        }
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    pub async fn run_by_slug(&self, slug: &str, cancel: CancelFlag) -> Result<RunResult> {
        let newsletter = self
            .repo
            .get_newsletter_by_slug(slug)
            .await?
            .ok_or_else(|| AppError::NewsletterNotFound(slug.to_string()))?;
        self.run(newsletter.id, cancel).await
    }

    /// Execute one run for a newsletter. Serialized per newsletter; a second
    /// caller while one run is in flight gets `RunInProgress`.
    pub async fn run(&self, newsletter_id: i64, cancel: CancelFlag) -> Result<RunResult> {
        let _guard = self
            .gate
            .try_acquire(newsletter_id)
            .ok_or(AppError::RunInProgress(newsletter_id))?;

        let newsletter = self
            .repo
            .get_newsletter(newsletter_id)
            .await?
            .ok_or_else(|| AppError::NewsletterNotFound(newsletter_id.to_string()))?;
        let settings = self.repo.load_settings().await?;

        let mut run = self.repo.create_run(newsletter_id).await?;
        let recorder = RunRecorder::new(run.run_id);

        let outcome = tokio::time::timeout(
            RUN_DEADLINE,
            self.execute(&newsletter, &settings, &mut run, &recorder, &cancel),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(AppError::Cancelled)) => {
                recorder.warn("run.cancelled", None);
                run.status = RunStatus::Failed;
                run.error = Some("cancelled".to_string());
            }
            Ok(Err(e)) => {
                recorder.error("run.failed", Some(json!({ "error": e.to_string() })));
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
            }
            Err(_) => {
                recorder.error("run.deadline_exceeded", None);
                run.status = if run.feeds_ok > 0 {
                    RunStatus::Partial
                } else {
                    RunStatus::Failed
                };
                run.error = Some("deadline_exceeded".to_string());
            }
        }

        run.finished_at = Some(Utc::now());
        self.repo.finish_run(&run).await?;
        if let Err(e) = self.repo.append_run_logs(run.run_id, recorder.entries()).await {
            tracing::error!("failed to append run logs for {}: {e}", run.run_id);
        }

        Ok(RunResult {
            run_id: run.run_id,
            status: run.status,
            feeds_total: run.feeds_total,
            feeds_ok: run.feeds_ok,
            articles_seen: run.articles_seen,
            articles_used: run.articles_used,
            email_sent: run.email_sent,
        })
    }

    async fn execute(
        &self,
        newsletter: &Newsletter,
        settings: &AppSettings,
        run: &mut Run,
        recorder: &RunRecorder,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let tz = resolve_timezone(newsletter, settings);

        // Ingest.
        let feeds = self.repo.enabled_feeds(newsletter.id).await?;
        run.feeds_total = feeds.len() as u32;
        recorder.info(
            "run.started",
            Some(json!({ "newsletter": newsletter.slug, "feeds_total": run.feeds_total })),
        );

        let fetcher = FeedFetcher::new(FEED_TIMEOUT, settings.max_concurrency);
        let fetches = fetcher.fetch_all(feeds).await;

        let mut items = Vec::new();
        for fetch in fetches {
            match fetch.outcome {
                Ok(feed_items) => {
                    run.feeds_ok += 1;
                    recorder.info(
                        "feed.fetched",
                        Some(json!({ "feed": fetch.feed.label(), "items": feed_items.len() })),
                    );
                    items.extend(feed_items);
                }
                Err(error) => {
                    let event = match error.kind {
                        FetchErrorKind::Unreachable => "feed.unreachable",
                        FetchErrorKind::ParseInvalid => "feed.parse_invalid",
                    };
                    recorder.warn(
                        event,
                        Some(json!({ "feed": fetch.feed.label(), "url": fetch.feed.url, "error": error.message })),
                    );
                }
            }
        }
        run.articles_seen = items.len() as u32;

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        // Dedupe, then rank and cap what survived.
        let admitted = self.repo.admit_items(newsletter.id, items).await?;
        let fresh: Vec<_> = admitted.iter().map(|(item, _)| item.clone()).collect();
        let now = Utc::now();
        let selections = select_items(
            &fresh,
            now,
            settings.max_articles_for_ai,
            settings.per_source_cap,
        );
        let ranked: Vec<RankedItem> = selections
            .iter()
            .map(|s| RankedItem {
                item: admitted[s.index].0.clone(),
                article_id: admitted[s.index].1,
                rank: s.rank,
                score: s.score,
            })
            .collect();
        self.repo.record_selection(run.run_id, &ranked).await?;
        run.articles_used = ranked.len() as u32;
        recorder.info(&format!("ranked={}", ranked.len()), None);

        // Market data. Failures skip symbols, never the run.
        let watchlist = if newsletter.include_watchlist {
            self.repo.watchlist(newsletter.id).await?
        } else {
            Vec::new()
        };
        let mut quotes: Vec<Quote> = Vec::new();
        if !watchlist.is_empty() {
            let market = MarketDataClient::new(self.config.market_api_key.clone());
            for outcome in market.fetch_quotes(&watchlist).await {
                match outcome {
                    QuoteOutcome::Quote(quote) => {
                        self.repo.upsert_quote(run.run_id, &quote).await?;
                        quotes.push(quote);
                    }
                    QuoteOutcome::Skipped { symbol, reason } => {
                        recorder.warn(
                            "market.lookup_failure",
                            Some(json!({ "symbol": symbol, "reason": reason })),
                        );
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        // Analyst report, with the deterministic fallback once the cascade
        // is exhausted.
        let prompt = build_prompt(newsletter, &ranked, &quotes, &watchlist, now, tz);
        let cascade = Cascade::from_settings(settings, &self.config);
        let ai_outcome = cascade.generate(SYSTEM_PROMPT, &prompt, recorder, cancel).await;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let (summary_markdown, ai_ok) = match ai_outcome {
            Some(outcome) => {
                run.ai_tokens_in = outcome.tokens_in;
                run.ai_tokens_out = outcome.tokens_out;
                run.ai_provider_label = Some(outcome.provider_label);
                (outcome.text, true)
            }
            None => {
                recorder.warn("ai.exhausted", Some(json!({ "providers": cascade.len() })));
                run.ai_provider_label = Some(HEADLINES_LABEL.to_string());
                (headlines_fallback(&ranked), false)
            }
        };

        // Render and archive. The digest is stored whether or not delivery
        // succeeds, so it stays retrievable afterwards.
        let summary_html = markdown_to_html(&summary_markdown);
        let digest_html =
            render_digest(&newsletter.name, &summary_html, &quotes, &watchlist, now, tz);
        let subject = subject_line(&newsletter.name, now, tz);
        self.repo.store_digest(run.run_id, &subject, &digest_html).await?;

        // Deliver.
        let recipients = settings.default_recipients.clone();
        match Mailer::from_config(&self.config) {
            Some(mailer) if !recipients.is_empty() => {
                let text = plain_text_alternative(
                    &newsletter.name,
                    &summary_html,
                    &quotes,
                    &watchlist,
                    now,
                    tz,
                );
                let message = EmailMessage {
                    from: self.config.sender(settings.from_address.as_deref()),
                    to: recipients,
                    subject: subject.clone(),
                    html: digest_html,
                    text,
                };
                match mailer.send(&message).await {
                    Ok(()) => {
                        run.email_sent = true;
                        recorder.info(
                            "email.sent",
                            Some(json!({ "recipients": message.to.len() })),
                        );
                    }
                    Err(e) => {
                        recorder.error(
                            "email.transport_failure",
                            Some(json!({ "error": e.to_string() })),
                        );
                    }
                }
            }
            Some(_) => recorder.warn("email.skipped: no recipients configured", None),
            None => recorder.warn("email.skipped: no transport configured", None),
        }

        run.status = if run.feeds_ok == 0 {
            run.error = Some("no feeds succeeded".to_string());
            RunStatus::Failed
        } else if ai_ok && run.email_sent {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        recorder.info(
            "run.finished",
            Some(json!({
                "status": run.status.as_str(),
                "feeds_ok": run.feeds_ok,
                "articles_used": run.articles_used,
                "email_sent": run.email_sent,
            })),
        );
        Ok(())
    }
}

fn resolve_timezone(newsletter: &Newsletter, settings: &AppSettings) -> Tz {
    newsletter
        .timezone
        .parse::<Tz>()
        .ok()
        .or_else(|| settings.default_timezone.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewNewsletter, NewsletterType, Verbosity};
    use std::path::PathBuf;

    fn offline_config() -> Arc<Config> {
        Arc::new(Config {
            data_dir: PathBuf::from("."),
            db_path: ":memory:".to_string(),
            openai_api_key: None,
            gemini_api_key: None,
            anthropic_api_key: None,
            market_api_key: None,
            email_api_key: None,
            email_api_url: String::new(),
            from_email: "digest@example.com".to_string(),
            from_name: "Briefcast".to_string(),
            smtp: None,
            dev_mode: true,
        })
    }

    async fn pipeline_with_newsletter() -> (Pipeline, i64) {
        let repo = Arc::new(Repository::new_in_memory().await.unwrap());
        let id = repo
            .insert_newsletter(NewNewsletter {
                slug: "daily".to_string(),
                name: "Daily Brief".to_string(),
                timezone: "UTC".to_string(),
                schedule_times: vec!["06:30".to_string()],
                include_watchlist: false,
                newsletter_type: NewsletterType::GeneralBusiness,
                verbosity: Verbosity::Medium,
                custom_prompt: String::new(),
            })
            .await
            .unwrap();
        (Pipeline::new(repo, offline_config()), id)
    }

    #[tokio::test]
    async fn run_with_no_feeds_fails_but_archives_a_digest() {
        let (pipeline, id) = pipeline_with_newsletter().await;
        let result = pipeline.run(id, CancelFlag::default()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.feeds_total, 0);
        assert_eq!(result.feeds_ok, 0);
        assert!(!result.email_sent);

        let run = pipeline.repo.get_run(result.run_id).await.unwrap().unwrap();
        assert_eq!(run.error.as_deref(), Some("no feeds succeeded"));
        assert_eq!(run.ai_provider_label.as_deref(), Some(HEADLINES_LABEL));
        assert_eq!(run.ai_tokens_in, 0);
        assert_eq!(run.ai_tokens_out, 0);
        assert!(run.finished_at.is_some());

        // Digest archived despite the failure, with the headlines body.
        let (subject, html) = pipeline
            .repo
            .digest_for_run(result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert!(subject.starts_with("Daily Brief — "));
        assert!(html.contains("<h3>Headlines</h3>"));

        // Logs were appended and include the lifecycle markers.
        let logs = pipeline.repo.logs_for_run(result.run_id).await.unwrap();
        let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
        assert!(messages.contains(&"run.started"));
        assert!(messages.contains(&"ranked=0"));
        assert!(messages.contains(&"ai.exhausted"));
        assert!(messages.contains(&"run.finished"));
    }

    #[tokio::test]
    async fn pre_cancelled_run_ends_failed_with_cancelled_error() {
        let (pipeline, id) = pipeline_with_newsletter().await;
        let cancel = CancelFlag::default();
        cancel.cancel();
        let result = pipeline.run(id, cancel).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);

        let run = pipeline.repo.get_run(result.run_id).await.unwrap().unwrap();
        assert_eq!(run.error.as_deref(), Some("cancelled"));
        // Nothing selected, nothing sent.
        assert_eq!(run.articles_used, 0);
        assert!(!run.email_sent);
    }

    #[tokio::test]
    async fn concurrent_runs_for_one_newsletter_are_coalesced() {
        let (pipeline, id) = pipeline_with_newsletter().await;
        let _held = pipeline.gate().try_acquire(id).unwrap();
        let result = pipeline.run(id, CancelFlag::default()).await;
        assert!(matches!(result, Err(AppError::RunInProgress(found)) if found == id));
    }

    #[tokio::test]
    async fn unknown_newsletter_is_reported() {
        let (pipeline, _) = pipeline_with_newsletter().await;
        let result = pipeline.run(9999, CancelFlag::default()).await;
        assert!(matches!(result, Err(AppError::NewsletterNotFound(_))));

        let by_slug = pipeline.run_by_slug("nope", CancelFlag::default()).await;
        assert!(matches!(by_slug, Err(AppError::NewsletterNotFound(_))));
    }

    #[tokio::test]
    async fn second_run_sees_nothing_new() {
        // Idempotence at the pipeline level: with no reachable feeds the seen
        // set stays empty, and two consecutive runs both select zero items.
        let (pipeline, id) = pipeline_with_newsletter().await;
        let first = pipeline.run(id, CancelFlag::default()).await.unwrap();
        let second = pipeline.run(id, CancelFlag::default()).await.unwrap();
        assert_eq!(first.articles_used, 0);
        assert_eq!(second.articles_used, 0);
        assert_ne!(first.run_id, second.run_id);

        let runs = pipeline.repo.list_runs(id, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
    }
}
