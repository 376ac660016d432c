use std::sync::OnceLock;

use regex::Regex;

/// Minimal Markdown-to-HTML conversion for digest bodies.
///
/// Supported: `##`/`###` headings, unordered (`-`/`*`) and ordered (`N.`)
/// lists, bold, italics, `[text](url)` links, bracketed bare URLs, and bare
/// URLs. Everything else becomes an escaped paragraph. Input is HTML-escaped
/// before any substitution, and every generated anchor opens in a new tab
/// with `rel="noopener noreferrer"`.
pub fn markdown_to_html(markdown: &str) -> String {
    #[derive(PartialEq)]
    enum List {
        None,
        Unordered,
        Ordered,
    }

    let mut out = String::new();
    let mut list = List::None;

    let close_list = |out: &mut String, list: &mut List| match list {
        List::Unordered => {
            out.push_str("</ul>\n");
            *list = List::None;
        }
        List::Ordered => {
            out.push_str("</ol>\n");
            *list = List::None;
        }
        List::None => {}
    };

    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            close_list(&mut out, &mut list);
            continue;
        }

        if let Some(text) = trimmed.strip_prefix("### ") {
            close_list(&mut out, &mut list);
            out.push_str(&format!("<h3>{}</h3>\n", render_inline(text)));
        } else if let Some(text) = trimmed.strip_prefix("## ") {
            close_list(&mut out, &mut list);
            out.push_str(&format!("<h2>{}</h2>\n", render_inline(text)));
        } else if let Some(text) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* "))
        {
            if list != List::Unordered {
                close_list(&mut out, &mut list);
                out.push_str("<ul>\n");
                list = List::Unordered;
            }
            out.push_str(&format!("<li>{}</li>\n", render_inline(text)));
        } else if let Some(text) = ordered_item(trimmed) {
            if list != List::Ordered {
                close_list(&mut out, &mut list);
                out.push_str("<ol>\n");
                list = List::Ordered;
            }
            out.push_str(&format!("<li>{}</li>\n", render_inline(text)));
        } else {
            close_list(&mut out, &mut list);
            out.push_str(&format!("<p>{}</p>\n", render_inline(trimmed)));
        }
    }
    close_list(&mut out, &mut list);
    out
}

fn ordered_item(line: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^\d+\.\s+(.*)$").expect("valid regex"));
    re.captures(line).map(|caps| caps.get(1).unwrap().as_str())
}

pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn anchor(href: &str, text: &str) -> String {
    format!(r#"<a href="{href}" target="_blank" rel="noopener noreferrer">{text}</a>"#)
}

fn placeholder(index: usize) -> String {
    format!("\u{1}{index}\u{2}")
}

/// Inline substitution over an escaped line. Anchors are parked behind
/// control-character placeholders so later passes cannot rewrite a URL that
/// already sits inside an href attribute.
fn render_inline(raw: &str) -> String {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    static BRACKET_URL_RE: OnceLock<Regex> = OnceLock::new();
    static BARE_URL_RE: OnceLock<Regex> = OnceLock::new();
    static BOLD_RE: OnceLock<Regex> = OnceLock::new();
    static ITALIC_RE: OnceLock<Regex> = OnceLock::new();

    let link_re = LINK_RE
        .get_or_init(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").expect("valid regex"));
    let bracket_re = BRACKET_URL_RE
        .get_or_init(|| Regex::new(r"\[(https?://[^\]\s]+)\]").expect("valid regex"));
    let bare_re = BARE_URL_RE
        .get_or_init(|| Regex::new(r#"https?://[^\s<>"\u{1}\u{2}]+"#).expect("valid regex"));
    let bold_re = BOLD_RE.get_or_init(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid regex"));
    let italic_re = ITALIC_RE.get_or_init(|| Regex::new(r"\*([^*]+)\*").expect("valid regex"));

    let mut anchors: Vec<String> = Vec::new();
    let mut text = escape_html(raw);

    text = link_re
        .replace_all(&text, |caps: &regex::Captures| {
            anchors.push(anchor(&caps[2], &caps[1]));
            placeholder(anchors.len() - 1)
        })
        .into_owned();
    text = bracket_re
        .replace_all(&text, |caps: &regex::Captures| {
            anchors.push(anchor(&caps[1], &caps[1]));
            placeholder(anchors.len() - 1)
        })
        .into_owned();
    text = bare_re
        .replace_all(&text, |caps: &regex::Captures| {
            anchors.push(anchor(&caps[0], &caps[0]));
            placeholder(anchors.len() - 1)
        })
        .into_owned();

    text = bold_re.replace_all(&text, "<strong>$1</strong>").into_owned();
    text = italic_re.replace_all(&text, "<em>$1</em>").into_owned();

    for (index, html) in anchors.iter().enumerate() {
        text = text.replace(&placeholder(index), html);
    }
    text
}
