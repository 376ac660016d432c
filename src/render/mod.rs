pub mod markdown;
pub mod template;

pub use markdown::markdown_to_html;
pub use template::{plain_text_alternative, render_digest, subject_line};
