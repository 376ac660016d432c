use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;

use crate::ai::market_time::market_status_hint;
use crate::models::{Newsletter, Quote, RankedItem, Verbosity};

/// System-role instruction. The heading contract below is what the renderer
/// and email template are tuned for; the model is told to follow it exactly.
pub const SYSTEM_PROMPT: &str = "You are a professional financial and market analyst writing a \
daily email briefing. Produce a Markdown document with exactly these headings, in this order:\n\
## SECTION 1 - MARKET PERFORMANCE\n\
## SECTION 2 - TOP MARKET & ECONOMY STORIES (5 stories)\n\
## SECTION 3 - GENERAL NEWS STORIES (10 stories)\n\
### LOOKING AHEAD (Tomorrow)\n\
Use bullet lists inside each section. Cite stories with their links. Be factual and concise; \
never invent prices, tickers, or headlines that were not supplied.";

/// Assemble the full user prompt: context block, then numbered headlines,
/// then a per-source grouping with description snippets.
pub fn build_prompt(
    newsletter: &Newsletter,
    items: &[RankedItem],
    quotes: &[Quote],
    watchlist: &[String],
    now: DateTime<Utc>,
    tz: Tz,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(context_block(newsletter, quotes, watchlist, now, tz));

    if items.is_empty() {
        sections.push("No articles were retrieved from the configured feeds.".to_string());
    } else {
        sections.push(numbered_headlines(items));
        sections.push(source_groups(items));
    }

    if !newsletter.custom_prompt.trim().is_empty() {
        sections.push(newsletter.custom_prompt.trim().to_string());
    }

    sections.join("\n\n")
}

fn context_block(
    newsletter: &Newsletter,
    quotes: &[Quote],
    watchlist: &[String],
    now: DateTime<Utc>,
    tz: Tz,
) -> String {
    let local = now.with_timezone(&tz);
    let mut lines = vec![
        format!(
            "Today is {}, {} {}, {} ({} time). US market status: {}.",
            local.format("%A"),
            local.format("%B"),
            local.day(),
            local.year(),
            tz.name(),
            market_status_hint(now, tz),
        ),
        "Write all dates out literally. Never leave placeholder tokens such as [Today] or \
[Tomorrow's Date] in the output."
            .to_string(),
        verbosity_instruction(newsletter.verbosity).to_string(),
    ];

    if !watchlist.is_empty() {
        lines.push(format!("Tracked tickers: {}.", watchlist.join(", ")));
    }
    if !quotes.is_empty() {
        lines.push("## Market Data".to_string());
        lines.push(market_table(quotes));
    } else if !watchlist.is_empty() {
        lines.push(
            "No market performance data was supplied for this briefing. Do not fabricate price \
tables or quote values."
                .to_string(),
        );
    }

    lines.join("\n\n")
}

fn verbosity_instruction(verbosity: Verbosity) -> &'static str {
    match verbosity {
        Verbosity::Low => "Keep every section tight: one line per story, no preamble.",
        Verbosity::Medium => "Give each story one to two sentences of analysis.",
        Verbosity::High => {
            "Give each story a short paragraph of analysis, including why it matters."
        }
    }
}

/// `N. title [url]`, in rank order.
fn numbered_headlines(items: &[RankedItem]) -> String {
    let mut lines = vec!["## Headlines (ranked)".to_string()];
    for ranked in items {
        lines.push(format!(
            "{}. {} [{}]",
            ranked.rank, ranked.item.title, ranked.item.canonical_url
        ));
    }
    lines.join("\n")
}

/// Headlines grouped by source hostname, with description snippets.
fn source_groups(items: &[RankedItem]) -> String {
    let mut order: Vec<&str> = Vec::new();
    for ranked in items {
        if !order.contains(&ranked.item.source.as_str()) {
            order.push(&ranked.item.source);
        }
    }

    let mut lines = vec!["## By source".to_string()];
    for source in order {
        let group: Vec<&RankedItem> = items.iter().filter(|r| r.item.source == source).collect();
        lines.push(format!("### {} ({} articles)", source, group.len()));
        for ranked in group {
            lines.push(format!("- **{}**", ranked.item.title));
            if !ranked.item.description.is_empty() {
                lines.push(format!("  {}", ranked.item.description));
            }
            lines.push(format!("  Source: {}", ranked.item.canonical_url));
        }
    }
    lines.join("\n")
}

/// Markdown quote table for the prompt context.
pub fn market_table(quotes: &[Quote]) -> String {
    let mut lines = vec![
        "| Symbol | Price | Change | % |".to_string(),
        "| --- | ---: | ---: | ---: |".to_string(),
    ];
    for quote in quotes {
        let sign = if quote.is_gain() { "+" } else { "-" };
        lines.push(format!(
            "| {} | ${:.2} | {}{:.2} | {}{:.2}% |",
            quote.symbol,
            quote.price,
            sign,
            quote.change_amount.abs(),
            sign,
            quote.change_percent.abs(),
        ));
    }
    lines.join("\n")
}
