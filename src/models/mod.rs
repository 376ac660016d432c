mod article;
mod newsletter;
mod quote;
mod run;
mod settings;

pub use article::{Article, NormalizedItem, RankedItem};
pub use newsletter::{Feed, NewFeed, NewNewsletter, Newsletter, NewsletterType, Verbosity};
pub use quote::Quote;
pub use run::{LogLevel, Run, RunLogEntry, RunResult, RunStatus};
pub use settings::{parse_recipient_list, AppSettings, ReasoningLevel};
