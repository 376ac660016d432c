use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An equity quote captured for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change_amount: f64,
    pub change_percent: f64,
    pub captured_at: DateTime<Utc>,
}

impl Quote {
    pub fn is_gain(&self) -> bool {
        self.change_amount >= 0.0
    }
}
