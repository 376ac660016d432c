pub const SCHEMA: &str = r#"
-- newsletters table
CREATE TABLE IF NOT EXISTS newsletters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    schedule_times TEXT NOT NULL DEFAULT '[]',
    active INTEGER NOT NULL DEFAULT 1,
    include_watchlist INTEGER NOT NULL DEFAULT 0,
    newsletter_type TEXT NOT NULL DEFAULT 'general_business',
    verbosity TEXT NOT NULL DEFAULT 'medium',
    custom_prompt TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    newsletter_id INTEGER NOT NULL REFERENCES newsletters(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    title TEXT,
    category TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    order_index INTEGER NOT NULL DEFAULT 0,
    UNIQUE(newsletter_id, url)
);

CREATE INDEX IF NOT EXISTS idx_feeds_newsletter_id ON feeds(newsletter_id);

-- watchlist symbols
CREATE TABLE IF NOT EXISTS watchlist_symbols (
    newsletter_id INTEGER NOT NULL REFERENCES newsletters(id) ON DELETE CASCADE,
    symbol TEXT NOT NULL,
    UNIQUE(newsletter_id, symbol)
);

-- articles: created on first sighting, never mutated
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    canonical_url TEXT NOT NULL,
    published_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_articles_source ON articles(source);
CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles(published_at);

-- per-newsletter seen set for cross-run dedupe
CREATE TABLE IF NOT EXISTS seen_hashes (
    content_hash TEXT NOT NULL,
    newsletter_id INTEGER NOT NULL REFERENCES newsletters(id) ON DELETE CASCADE,
    first_seen_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (content_hash, newsletter_id)
);

CREATE INDEX IF NOT EXISTS idx_seen_hashes_first_seen_at ON seen_hashes(first_seen_at);

-- runs table
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    newsletter_id INTEGER NOT NULL REFERENCES newsletters(id) ON DELETE CASCADE,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL DEFAULT 'started',
    feeds_total INTEGER NOT NULL DEFAULT 0,
    feeds_ok INTEGER NOT NULL DEFAULT 0,
    articles_seen INTEGER NOT NULL DEFAULT 0,
    articles_used INTEGER NOT NULL DEFAULT 0,
    ai_tokens_in INTEGER NOT NULL DEFAULT 0,
    ai_tokens_out INTEGER NOT NULL DEFAULT 0,
    ai_provider_label TEXT,
    email_sent INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_newsletter_id ON runs(newsletter_id);
CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);

-- selected articles per run, rank is 1-based and unique within the run
CREATE TABLE IF NOT EXISTS run_articles (
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    article_id INTEGER NOT NULL REFERENCES articles(id),
    rank INTEGER NOT NULL,
    score REAL NOT NULL,
    UNIQUE(run_id, rank)
);

CREATE INDEX IF NOT EXISTS idx_run_articles_run_id ON run_articles(run_id);

-- quotes captured per run
CREATE TABLE IF NOT EXISTS market_data (
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    symbol TEXT NOT NULL,
    price REAL NOT NULL,
    change_amount REAL NOT NULL,
    change_percent REAL NOT NULL,
    captured_at TEXT NOT NULL,
    PRIMARY KEY (run_id, symbol)
);

CREATE INDEX IF NOT EXISTS idx_market_data_run_id ON market_data(run_id);

-- archived digest HTML per run
CREATE TABLE IF NOT EXISTS digests (
    run_id TEXT PRIMARY KEY REFERENCES runs(run_id) ON DELETE CASCADE,
    subject TEXT NOT NULL,
    html TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- append-only per-run log stream
CREATE TABLE IF NOT EXISTS run_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    ts TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    context_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_run_logs_run_id ON run_logs(run_id);

-- dynamic settings bag
CREATE TABLE IF NOT EXISTS app_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
