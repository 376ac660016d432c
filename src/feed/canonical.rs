use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

/// Tracking query parameters stripped during URL canonicalization.
const TRACKING_PARAMS: [&str; 10] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_name",
    "mc_cid",
    "mc_eid",
    "gclid",
    "igshid",
];

/// Canonical form of a link: tracking params removed, host lowercased.
/// Returns the canonical URL and its host; `None` for unparseable input.
pub fn canonicalize_url(raw: &str) -> Option<(String, String)> {
    let mut url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_lowercase();

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    // The url crate lowercases registered domain hosts on parse; setting it
    // again covers inputs that bypass that normalization.
    url.set_host(Some(&host)).ok()?;

    Some((url.to_string(), host))
}

/// Normalized title: trimmed, lowercased, with every run of whitespace or
/// punctuation collapsed to a single space.
pub fn normalize_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_space = true;
        }
    }
    out
}

/// Deterministic identity of an item: SHA-256 over the normalized title, the
/// canonical URL, the UTC calendar date (or empty when unparsable), and the
/// host, joined with `|`.
pub fn content_hash(
    title_norm: &str,
    canonical_url: &str,
    published_at: Option<DateTime<Utc>>,
    host: &str,
) -> String {
    let date_part = published_at
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(title_norm.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_url.as_bytes());
    hasher.update(b"|");
    hasher.update(date_part.as_bytes());
    hasher.update(b"|");
    hasher.update(host.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn strips_tracking_params_and_lowercases_host() {
        let (a, host) = canonicalize_url(
            "https://News.Example.COM/story?id=7&utm_source=mail&utm_campaign=x&gclid=abc",
        )
        .unwrap();
        let (b, _) = canonicalize_url("https://news.example.com/story?id=7").unwrap();
        assert_eq!(a, b);
        assert_eq!(host, "news.example.com");
    }

    #[test]
    fn url_without_tracking_params_is_untouched() {
        let (url, _) = canonicalize_url("https://example.com/a?b=1&c=2").unwrap();
        assert_eq!(url, "https://example.com/a?b=1&c=2");
    }

    #[test]
    fn invalid_urls_yield_none() {
        assert!(canonicalize_url("not a url").is_none());
        assert!(canonicalize_url("mailto:user@example.com").is_none());
    }

    #[test]
    fn title_normalization_collapses_punctuation_runs() {
        assert_eq!(
            normalize_title("  Fed --- holds   rates; markets \u{2014} cheer!  "),
            "fed holds rates markets cheer"
        );
        assert_eq!(normalize_title("Breaking: AT&T to split"), "breaking at t to split");
    }

    #[test]
    fn hash_is_stable_across_tracking_variants() {
        let published = Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).single();
        let (url_a, host_a) =
            canonicalize_url("https://example.com/x?utm_source=rss").unwrap();
        let (url_b, host_b) = canonicalize_url("https://EXAMPLE.com/x").unwrap();
        let title = normalize_title("Some Headline");
        assert_eq!(
            content_hash(&title, &url_a, published, &host_a),
            content_hash(&title, &url_b, published, &host_b)
        );
    }

    #[test]
    fn hash_distinguishes_dates_and_missing_dates() {
        let (url, host) = canonicalize_url("https://example.com/x").unwrap();
        let title = normalize_title("Some Headline");
        let day1 = Utc.with_ymd_and_hms(2026, 3, 5, 1, 0, 0).single();
        let day2 = Utc.with_ymd_and_hms(2026, 3, 6, 1, 0, 0).single();
        let h1 = content_hash(&title, &url, day1, &host);
        let h2 = content_hash(&title, &url, day2, &host);
        let h3 = content_hash(&title, &url, None, &host);
        assert_ne!(h1, h2);
        assert_ne!(h1, h3);
        // Same calendar date, different clock time: identical.
        let day1_later = Utc.with_ymd_and_hms(2026, 3, 5, 23, 0, 0).single();
        assert_eq!(h1, content_hash(&title, &url, day1_later, &host));
    }
}
