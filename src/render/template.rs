use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;

use crate::ai::market_time::is_market_closed_day;
use crate::models::Quote;
use crate::render::markdown::escape_html;

const GAIN_COLOR: &str = "#15803d";
const LOSS_COLOR: &str = "#b91c1c";

/// `<Newsletter Name> — <weekday>, <short-month> <day>` in the newsletter's
/// timezone.
pub fn subject_line(name: &str, now: DateTime<Utc>, tz: Tz) -> String {
    let local = now.with_timezone(&tz);
    format!(
        "{} — {}, {} {}",
        name,
        local.format("%A"),
        local.format("%b"),
        local.day()
    )
}

/// The full digest HTML: a single centered column, inline styles only.
pub fn render_digest(
    newsletter_name: &str,
    summary_html: &str,
    quotes: &[Quote],
    watchlist: &[String],
    now: DateTime<Utc>,
    tz: Tz,
) -> String {
    let local = now.with_timezone(&tz);
    let closed = is_market_closed_day(local.date_naive());
    let badge_label = if closed { "Market Closed" } else { "Market Day" };
    let (badge_bg, badge_fg) = if closed {
        ("#fee2e2", "#991b1b")
    } else {
        ("#dcfce7", "#065f46")
    };
    let badge_date = format!("{}, {} {}", local.format("%A"), local.format("%b"), local.day());

    let market_section = if quotes.is_empty() {
        String::new()
    } else {
        market_table_html(quotes)
    };

    let footer_symbols = if watchlist.is_empty() {
        "No symbols tracked.".to_string()
    } else {
        format!("Tracked symbols: {}", escape_html(&watchlist.join(", ")))
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>{title}</title>
</head>
<body style="margin:0;padding:0;background:#f4f4f5;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Helvetica,Arial,sans-serif;color:#1f2933;">
  <div style="max-width:720px;margin:0 auto;padding:24px 12px;">
    <div style="background:#ffffff;border-radius:12px;padding:28px 24px;border:1px solid #e4e4e7;">
      <h1 style="margin:0 0 4px 0;font-size:22px;color:#111827;">{title}</h1>
      <div style="display:inline-block;padding:5px 10px;border-radius:999px;font-size:12px;margin:6px 0;background:{badge_bg};color:{badge_fg};">{badge_date} &bull; {badge_label}</div>
{market_section}      <div style="font-size:15px;line-height:1.55;">
{summary_html}      </div>
      <hr style="border:none;border-top:1px solid #e4e4e7;margin:24px 0 12px 0;" />
      <div style="font-size:12px;color:#6b7280;">{footer_symbols}</div>
    </div>
  </div>
</body>
</html>
"#,
        title = escape_html(newsletter_name),
        badge_bg = badge_bg,
        badge_fg = badge_fg,
        badge_date = badge_date,
        badge_label = badge_label,
        market_section = market_section,
        summary_html = summary_html,
        footer_symbols = footer_symbols,
    )
}

/// Quote table, color-coded by sign, inline styles only.
fn market_table_html(quotes: &[Quote]) -> String {
    let mut rows = String::new();
    for quote in quotes {
        let color = if quote.is_gain() { GAIN_COLOR } else { LOSS_COLOR };
        let sign = if quote.is_gain() { "+" } else { "-" };
        rows.push_str(&format!(
            r#"        <tr>
          <td style="padding:6px 10px;border-bottom:1px solid #e4e4e7;font-weight:600;">{symbol}</td>
          <td style="padding:6px 10px;border-bottom:1px solid #e4e4e7;text-align:right;">${price:.2}</td>
          <td style="padding:6px 10px;border-bottom:1px solid #e4e4e7;text-align:right;color:{color};">{sign}{change:.2}</td>
          <td style="padding:6px 10px;border-bottom:1px solid #e4e4e7;text-align:right;color:{color};">{sign}{pct:.2}%</td>
        </tr>
"#,
            symbol = escape_html(&quote.symbol),
            price = quote.price,
            color = color,
            sign = sign,
            change = quote.change_amount.abs(),
            pct = quote.change_percent.abs(),
        ));
    }
    format!(
        r#"      <table style="width:100%;border-collapse:collapse;margin:16px 0;font-size:14px;">
        <tr>
          <th style="padding:6px 10px;border-bottom:2px solid #d4d4d8;text-align:left;">Symbol</th>
          <th style="padding:6px 10px;border-bottom:2px solid #d4d4d8;text-align:right;">Price</th>
          <th style="padding:6px 10px;border-bottom:2px solid #d4d4d8;text-align:right;">Change</th>
          <th style="padding:6px 10px;border-bottom:2px solid #d4d4d8;text-align:right;">%</th>
        </tr>
{rows}      </table>
"#
    )
}

/// Plain-text alternative: tags stripped, the market table bulletized.
pub fn plain_text_alternative(
    newsletter_name: &str,
    summary_html: &str,
    quotes: &[Quote],
    watchlist: &[String],
    now: DateTime<Utc>,
    tz: Tz,
) -> String {
    let mut sections = vec![subject_line(newsletter_name, now, tz)];

    if !quotes.is_empty() {
        let mut lines = vec!["Market performance:".to_string()];
        for quote in quotes {
            let sign = if quote.is_gain() { "+" } else { "-" };
            lines.push(format!(
                "- {} ${:.2} {}{:.2} ({}{:.2}%)",
                quote.symbol,
                quote.price,
                sign,
                quote.change_amount.abs(),
                sign,
                quote.change_percent.abs(),
            ));
        }
        sections.push(lines.join("\n"));
    }

    sections.push(html_to_text(summary_html));

    if !watchlist.is_empty() {
        sections.push(format!("Tracked symbols: {}", watchlist.join(", ")));
    }

    sections.join("\n\n")
}

/// Tag stripping with enough structure kept to stay readable in a text part.
fn html_to_text(html: &str) -> String {
    let mut text = html
        .replace("</p>", "\n")
        .replace("</h2>", "\n")
        .replace("</h3>", "\n")
        .replace("</li>", "\n")
        .replace("<li>", "- ")
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");

    let mut stripped = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.drain(..) {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => stripped.push(ch),
            _ => {}
        }
    }

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&bull;", "*")
        .replace("&amp;", "&");

    let mut lines: Vec<&str> = decoded.lines().map(str::trim_end).collect();
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    let mut out: Vec<&str> = Vec::new();
    for line in lines {
        if line.is_empty() && out.last().is_some_and(|l| l.is_empty()) {
            continue;
        }
        out.push(line);
    }
    out.join("\n").trim_end().to_string()
}
