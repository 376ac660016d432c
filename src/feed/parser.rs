use std::sync::OnceLock;

use feed_rs::model::{Entry, Feed as ParsedFeed};
use regex::Regex;

use crate::feed::canonical::{canonicalize_url, content_hash, normalize_title};
use crate::models::NormalizedItem;

const SNIPPET_MAX_CHARS: usize = 220;

/// Map a parsed RSS/Atom document onto normalized items.
///
/// Entries missing a usable title or link are dropped silently; unparseable
/// links are dropped during canonicalization. Unknown elements were already
/// ignored by the parser, and external entities are never resolved.
pub fn normalize_feed(feed: ParsedFeed) -> Vec<NormalizedItem> {
    feed.entries.into_iter().filter_map(normalize_entry).collect()
}

fn normalize_entry(entry: Entry) -> Option<NormalizedItem> {
    let title = entry.title.as_ref().map(|t| t.content.trim().to_string())?;
    if title.is_empty() {
        return None;
    }

    let link = pick_link(&entry)?;
    let (canonical_url, source) = canonicalize_url(&link)?;

    let published_at = entry.published.or(entry.updated);

    let raw_description = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();
    let description = snippet(&raw_description);

    let title_norm = normalize_title(&title);
    let hash = content_hash(&title_norm, &canonical_url, published_at, &source);

    Some(NormalizedItem {
        title,
        canonical_url,
        source,
        published_at,
        description,
        content_hash: hash,
    })
}

/// Link selection: the first `rel="alternate"` link, else the first link,
/// else the entry id when it looks like a URL (RSS guid-as-permalink).
fn pick_link(entry: &Entry) -> Option<String> {
    let alternate = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| entry.links.first());
    if let Some(link) = alternate {
        return Some(link.href.clone());
    }
    let id = entry.id.trim();
    if id.starts_with("http://") || id.starts_with("https://") {
        return Some(id.to_string());
    }
    None
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

/// Strip markup and squeeze the description into a prompt-sized snippet.
pub fn snippet(raw: &str) -> String {
    let stripped = tag_regex().replace_all(raw, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_MAX_CHARS {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(SNIPPET_MAX_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> ParsedFeed {
        feed_rs::parser::parse(xml.as_bytes()).expect("feed parses")
    }

    const RSS_SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Wire</title>
  <item>
    <title>Fed holds rates steady</title>
    <link>https://wire.example.com/fed?utm_source=rss</link>
    <pubDate>Tue, 03 Mar 2026 14:30:00 GMT</pubDate>
    <description><![CDATA[<p>The central bank held &amp; markets cheered.</p>]]></description>
  </item>
  <item>
    <title></title>
    <link>https://wire.example.com/untitled</link>
  </item>
  <item>
    <title>No link here</title>
  </item>
  <unknownElement>ignored</unknownElement>
</channel></rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Wire</title>
  <id>urn:uuid:feed</id>
  <updated>2026-03-03T10:00:00Z</updated>
  <entry>
    <title>Chip maker beats estimates</title>
    <id>urn:uuid:entry-1</id>
    <link rel="self" href="https://atom.example.com/self/1"/>
    <link rel="alternate" href="https://atom.example.com/story/1"/>
    <updated>2026-03-03T09:00:00Z</updated>
    <summary>Quarterly numbers came in ahead.</summary>
  </entry>
</feed>"#;

    #[test]
    fn rss_items_are_normalized_and_bad_items_dropped() {
        let items = normalize_feed(parse(RSS_SAMPLE));
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title, "Fed holds rates steady");
        assert_eq!(item.canonical_url, "https://wire.example.com/fed");
        assert_eq!(item.source, "wire.example.com");
        assert!(item.published_at.is_some());
        assert_eq!(item.description, "The central bank held & markets cheered.");
    }

    #[test]
    fn atom_prefers_the_alternate_link() {
        let items = normalize_feed(parse(ATOM_SAMPLE));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].canonical_url, "https://atom.example.com/story/1");
        assert!(items[0].published_at.is_some());
    }

    #[test]
    fn snippet_strips_tags_and_truncates() {
        let long = format!("<div>{}</div>", "word ".repeat(100));
        let s = snippet(&long);
        assert!(s.chars().count() <= 220);
        assert!(s.ends_with("..."));
        assert!(!s.contains('<'));
        assert_eq!(snippet("<b>short</b> text"), "short text");
    }
}
