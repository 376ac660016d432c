use std::sync::Arc;

mod ai;
mod config;
mod db;
mod error;
mod feed;
mod mail;
mod market;
mod models;
mod pipeline;
mod render;
mod scheduler;
mod select;

use config::Config;
use db::Repository;
use error::{AppError, Result};
use models::{NewFeed, NewNewsletter, Newsletter, NewsletterType, Verbosity};
use pipeline::{CancelFlag, Pipeline};
use scheduler::Scheduler;
use uuid::Uuid;

const USAGE: &str = "briefcast - AI newsletter engine

USAGE:
    briefcast                              host the scheduler (default)
    briefcast run <slug>                   run one newsletter now
    briefcast reset-seen <slug> <hours>    forget items first seen in the window (1-168h)
    briefcast create <slug> <name> <tz>    create a newsletter
    briefcast add-feed <slug> <url>        attach a feed
    briefcast watch <slug> <symbol>        track a ticker
    briefcast enable|disable <slug>        toggle a newsletter
    briefcast set <key> <value>            write a setting
    briefcast runs <slug>                  list recent runs
    briefcast show-run <run_id>            run detail, selection, quotes
    briefcast logs <run_id>                per-run log stream
    briefcast digest <run_id>              print a run's digest HTML
    briefcast latest                       print the most recent digest HTML
    briefcast prune <days>                 delete runs older than N days
";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let config = Arc::new(Config::load()?);
    let repo = Arc::new(Repository::new(&config.db_path).await?);
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&repo), Arc::clone(&config)));

    match args.get(1).map(String::as_str) {
        None => serve(repo, pipeline).await,
        Some("run") => {
            let slug = expect_arg(&args, 2)?;
            let result = pipeline.run_by_slug(slug, CancelFlag::default()).await?;
            println!(
                "run {} finished: status={} feeds={}/{} articles seen={} used={} email_sent={}",
                result.run_id,
                result.status.as_str(),
                result.feeds_ok,
                result.feeds_total,
                result.articles_seen,
                result.articles_used,
                result.email_sent,
            );
            Ok(())
        }
        Some("reset-seen") => {
            let newsletter = newsletter_by_slug(&repo, expect_arg(&args, 2)?).await?;
            let hours: u32 = expect_arg(&args, 3)?
                .parse()
                .map_err(|_| anyhow::anyhow!("hours must be an integer in 1..=168"))?;
            let report = repo.reset_seen(newsletter.id, hours).await?;
            println!(
                "reset-seen({hours}h) for {}: before={} deleted={} after={}",
                newsletter.slug, report.before, report.deleted, report.after
            );
            Ok(())
        }
        Some("create") => {
            let slug = expect_arg(&args, 2)?;
            let name = expect_arg(&args, 3)?;
            let timezone = expect_arg(&args, 4)?;
            timezone
                .parse::<chrono_tz::Tz>()
                .map_err(|_| anyhow::anyhow!("'{timezone}' is not an IANA timezone"))?;
            let id = repo
                .insert_newsletter(NewNewsletter {
                    slug: slug.to_string(),
                    name: name.to_string(),
                    timezone: timezone.to_string(),
                    schedule_times: Vec::new(),
                    include_watchlist: false,
                    newsletter_type: NewsletterType::GeneralBusiness,
                    verbosity: Verbosity::Medium,
                    custom_prompt: String::new(),
                })
                .await?;
            println!("created newsletter {slug} (id {id})");
            Ok(())
        }
        Some("add-feed") => {
            let newsletter = newsletter_by_slug(&repo, expect_arg(&args, 2)?).await?;
            let url = expect_arg(&args, 3)?;
            let id = repo
                .insert_feed(NewFeed {
                    newsletter_id: newsletter.id,
                    url: url.to_string(),
                    title: None,
                    category: None,
                    order_index: 0,
                })
                .await?;
            println!("added feed {url} (id {id}) to {}", newsletter.slug);
            Ok(())
        }
        Some("watch") => {
            let newsletter = newsletter_by_slug(&repo, expect_arg(&args, 2)?).await?;
            let symbol = expect_arg(&args, 3)?;
            repo.add_watchlist_symbol(newsletter.id, symbol).await?;
            println!("tracking {} for {}", symbol.to_uppercase(), newsletter.slug);
            Ok(())
        }
        Some(toggle @ ("enable" | "disable")) => {
            let newsletter = newsletter_by_slug(&repo, expect_arg(&args, 2)?).await?;
            repo.set_newsletter_active(newsletter.id, toggle == "enable").await?;
            println!("{toggle}d {}", newsletter.slug);
            Ok(())
        }
        Some("set") => {
            let key = expect_arg(&args, 2)?;
            let value = expect_arg(&args, 3)?;
            repo.set_setting(key, value).await?;
            println!("set {key}");
            Ok(())
        }
        Some("runs") => {
            let newsletter = newsletter_by_slug(&repo, expect_arg(&args, 2)?).await?;
            for run in repo.list_runs(newsletter.id, 20).await? {
                println!(
                    "{}  {}  {:<7}  feeds={}/{} used={} email={} {}",
                    run.run_id,
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.status.as_str(),
                    run.feeds_ok,
                    run.feeds_total,
                    run.articles_used,
                    run.email_sent,
                    run.error.unwrap_or_default(),
                );
            }
            Ok(())
        }
        Some("show-run") => {
            let run_id = parse_run_id(expect_arg(&args, 2)?)?;
            let run = repo
                .get_run(run_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
            println!(
                "run {} status={} provider={} tokens={}+{}",
                run.run_id,
                run.status.as_str(),
                run.ai_provider_label.as_deref().unwrap_or("-"),
                run.ai_tokens_in,
                run.ai_tokens_out,
            );
            for (article, rank, score) in repo.articles_for_run(run_id).await? {
                println!("  #{rank} {} [{}] (score {score:.1})", article.title, article.source);
            }
            for quote in repo.quotes_for_run(run_id).await? {
                println!(
                    "  {} ${:.2} {:+.2} ({:+.2}%)",
                    quote.symbol, quote.price, quote.change_amount, quote.change_percent
                );
            }
            Ok(())
        }
        Some("logs") => {
            let run_id = parse_run_id(expect_arg(&args, 2)?)?;
            for entry in repo.logs_for_run(run_id).await? {
                println!(
                    "{} [{}] {} {}",
                    entry.ts.format("%H:%M:%S"),
                    entry.level.as_str(),
                    entry.message,
                    entry.context.map(|c| c.to_string()).unwrap_or_default(),
                );
            }
            Ok(())
        }
        Some("digest") => {
            let run_id = parse_run_id(expect_arg(&args, 2)?)?;
            let (_, html) = repo
                .digest_for_run(run_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no digest for run {run_id}"))?;
            println!("{html}");
            Ok(())
        }
        Some("latest") => {
            let (_, html) = repo
                .latest_digest()
                .await?
                .ok_or_else(|| anyhow::anyhow!("no digests archived yet"))?;
            println!("{html}");
            Ok(())
        }
        Some("prune") => {
            let days: u32 = expect_arg(&args, 2)?
                .parse()
                .map_err(|_| anyhow::anyhow!("days must be an integer"))?;
            let deleted = repo.prune_runs(days).await?;
            println!("pruned {deleted} runs older than {days} days");
            Ok(())
        }
        Some(_) => {
            eprint!("{USAGE}");
            Ok(())
        }
    }
}

async fn serve(repo: Arc<Repository>, pipeline: Arc<Pipeline>) -> Result<()> {
    let mut scheduler = Scheduler::new(repo, pipeline);
    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = shutdown.send(true);
        }
    });
    scheduler.run_loop().await
}

async fn newsletter_by_slug(repo: &Repository, slug: &str) -> Result<Newsletter> {
    repo.get_newsletter_by_slug(slug)
        .await?
        .ok_or_else(|| AppError::NewsletterNotFound(slug.to_string()))
}

fn expect_arg<'a>(args: &'a [String], index: usize) -> Result<&'a str> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        eprint!("{USAGE}");
        anyhow::anyhow!("missing argument").into()
    })
}

fn parse_run_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| anyhow::anyhow!("'{raw}' is not a run id").into())
}
