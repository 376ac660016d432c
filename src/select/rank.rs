use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::NormalizedItem;

/// Tokens too generic to signal topical overlap between headlines.
const STOPWORDS: [&str; 25] = [
    "THE", "A", "AN", "OF", "IN", "ON", "AND", "OR", "TO", "FOR", "WITH", "AT", "BY", "FROM",
    "ABOUT", "OVER", "AFTER", "BEFORE", "IS", "ARE", "WAS", "WERE", "AS", "NEW", "US",
];

const CLUSTER_SIMILARITY_THRESHOLD: f64 = 0.4;
const CLUSTER_WEIGHT: f64 = 6.0;

/// An accepted item: its position in the input slice, its score, and its
/// 1-based rank after sorting and capping.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub index: usize,
    pub score: f64,
    pub rank: u32,
}

/// Score, sort, and cap the fresh items of a run.
///
/// Ordering is deterministic: stable sort by descending score, so equal
/// scores keep insertion order. At most `per_source_cap` items per hostname
/// are accepted, and at most `max_for_ai` overall.
pub fn select_items(
    items: &[NormalizedItem],
    now: DateTime<Utc>,
    max_for_ai: usize,
    per_source_cap: usize,
) -> Vec<Selection> {
    let scores = score_items(items, now);

    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|a, b| scores[*b].partial_cmp(&scores[*a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut per_source: HashMap<&str, usize> = HashMap::new();
    let mut selected = Vec::new();
    for index in order {
        if selected.len() >= max_for_ai {
            break;
        }
        let count = per_source.entry(items[index].source.as_str()).or_insert(0);
        if *count >= per_source_cap {
            continue;
        }
        *count += 1;
        selected.push(Selection {
            index,
            score: scores[index],
            rank: (selected.len() + 1) as u32,
        });
    }
    selected
}

/// Per-item score: recency weighting plus a boost for items whose titles
/// cluster with others (cross-feed coverage of the same story).
pub fn score_items(items: &[NormalizedItem], now: DateTime<Utc>) -> Vec<f64> {
    let cluster_sizes = cluster_sizes(items);

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let mut score = 0.0;
            if let Some(published) = item.published_at {
                let age_hours = (now - published).num_seconds().max(0) as f64 / 3600.0;
                score += 2.0 * (12.0 - age_hours).max(0.0);
                score += (24.0 - age_hours).max(0.0);
            }
            score += CLUSTER_WEIGHT * (cluster_sizes[i].saturating_sub(1)) as f64;
            score
        })
        .collect()
}

/// Union-find over title token sets: two items share a cluster when their
/// Jaccard similarity reaches the threshold. Quadratic comparison is fine at
/// per-run item counts.
fn cluster_sizes(items: &[NormalizedItem]) -> Vec<usize> {
    let token_sets: Vec<HashSet<String>> = items.iter().map(|i| tokenize(&i.title)).collect();
    let mut uf = UnionFind::new(items.len());

    for a in 0..items.len() {
        for b in (a + 1)..items.len() {
            if jaccard(&token_sets[a], &token_sets[b]) >= CLUSTER_SIMILARITY_THRESHOLD {
                uf.union(a, b);
            }
        }
    }

    let mut counts: HashMap<usize, usize> = HashMap::new();
    for i in 0..items.len() {
        *counts.entry(uf.find(i)).or_insert(0) += 1;
    }
    (0..items.len()).map(|i| counts[&uf.find(i)]).collect()
}

pub fn tokenize(title: &str) -> HashSet<String> {
    title
        .to_uppercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(title: &str, source: &str, age_hours: i64, now: DateTime<Utc>) -> NormalizedItem {
        NormalizedItem {
            title: title.to_string(),
            canonical_url: format!("https://{source}/{}", title.len()),
            source: source.to_string(),
            published_at: Some(now - Duration::hours(age_hours)),
            description: String::new(),
            content_hash: format!("{source}-{title}"),
        }
    }

    #[test]
    fn tokenizer_drops_stopwords_and_short_tokens() {
        let tokens = tokenize("The Fed is about to cut US rates");
        assert!(tokens.contains("FED"));
        assert!(tokens.contains("CUT"));
        assert!(tokens.contains("RATES"));
        assert!(!tokens.contains("THE"));
        assert!(!tokens.contains("TO"));
        assert!(!tokens.contains("US"));
    }

    #[test]
    fn fresh_items_outrank_stale_ones() {
        let now = Utc::now();
        let items = vec![
            item("Completely unrelated alpha story", "a.example", 30, now),
            item("Totally different beta report", "b.example", 1, now),
        ];
        let scores = score_items(&items, now);
        assert!(scores[1] > scores[0]);
        // Fresh item: 2*(12-1) + (24-1) = 45.
        assert!((scores[1] - 45.0).abs() < 0.1);
        // 30h old: both recency terms floor at zero.
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn unparseable_timestamps_earn_no_recency() {
        let now = Utc::now();
        let mut it = item("Some quiet story nobody else ran", "a.example", 0, now);
        it.published_at = None;
        let scores = score_items(&[it], now);
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn similar_titles_cluster_and_boost() {
        let now = Utc::now();
        let items = vec![
            item("Acme Corp acquires Widget Maker for billions", "a.example", 40, now),
            item("Acme Corp acquires Widget Maker in cash deal", "b.example", 40, now),
            item("Weather stays mild across the plains", "c.example", 40, now),
        ];
        let scores = score_items(&items, now);
        // Two clustered items each get 6 * (2 - 1); the loner gets nothing.
        assert!((scores[0] - 6.0).abs() < f64::EPSILON);
        assert!((scores[1] - 6.0).abs() < f64::EPSILON);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn joining_a_cluster_never_lowers_other_scores() {
        let now = Utc::now();
        let mut items = vec![
            item("Acme Corp acquires Widget Maker for billions", "a.example", 40, now),
            item("Acme Corp acquires Widget Maker in cash deal", "b.example", 40, now),
        ];
        let before = score_items(&items, now);
        items.push(item(
            "Acme Corp acquires Widget Maker regulators react",
            "c.example",
            40,
            now,
        ));
        let after = score_items(&items, now);
        for i in 0..before.len() {
            assert!(after[i] >= before[i]);
        }
    }

    #[test]
    fn per_source_cap_is_enforced() {
        let now = Utc::now();
        let mut items = Vec::new();
        for i in 0..20 {
            items.push(item(&format!("Unique story number {i} entirely"), "a.example", 1, now));
        }
        let selected = select_items(&items, now, 25, 10);
        assert_eq!(selected.len(), 10);
        let ranks: Vec<u32> = selected.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, (1..=10).collect::<Vec<u32>>());
    }

    #[test]
    fn overall_cap_limits_selection() {
        let now = Utc::now();
        let mut items = Vec::new();
        for i in 0..30 {
            items.push(item(
                &format!("Distinct headline {i} about nothing shared"),
                &format!("host{i}.example"),
                1,
                now,
            ));
        }
        let selected = select_items(&items, now, 25, 10);
        assert_eq!(selected.len(), 25);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let now = Utc::now();
        let items = vec![
            item("First unrelated alpha headline", "a.example", 5, now),
            item("Second unrelated beta headline", "b.example", 5, now),
            item("Third unrelated gamma headline", "c.example", 5, now),
        ];
        let selected = select_items(&items, now, 25, 10);
        let order: Vec<usize> = selected.iter().map(|s| s.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
