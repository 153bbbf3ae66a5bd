//! HTML to plain-text extraction.
//!
//! Turns fetched markup into the cleaned text that change detection
//! fingerprints and the chunker splits. Extraction never fails: malformed
//! markup is parsed leniently by `scraper` and an empty string is returned
//! only when the document holds no visible text at all.
//!
//! # Strategy
//!
//! | Step | Rule | Accepted when |
//! |------|------|---------------|
//! | 1 | `script`, `style`, `noscript`, `iframe` are never read | always |
//! | 2 | Caller CSS selector | ≥ 1 element matches |
//! | 3 | Caller XPath (translated to CSS) | translatable and ≥ 1 match |
//! | 4 | Main-content heuristic | longest candidate > 200 chars |
//! | 5 | `<body>`, then the whole document | always |
//!
//! Every path ends in [`clean_text`].

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

/// Elements whose text is never part of the page content.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "iframe"];

/// Candidate containers for the main-content heuristic, in priority order.
const MAIN_CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    ".main-content",
    "#main-content",
    ".content",
    "#content",
];

/// A heuristic match must carry more visible text than this.
const MIN_MAIN_CONTENT_CHARS: usize = 200;

/// Lines containing any of these (case-insensitive) are dropped.
const NOISE_LINES: &[&str] = &[
    "skip to content",
    "skip to main",
    "accept cookies",
    "cookie policy",
];

/// Extract cleaned text from `html`.
///
/// `selector` wins over `xpath` when both are given. A selector that does
/// not parse or matches nothing falls through to the next step rather than
/// failing.
pub fn extract_text(html: &str, selector: Option<&str>, xpath: Option<&str>) -> String {
    let document = Html::parse_document(html);

    if let Some(css) = selector.filter(|s| !s.trim().is_empty()) {
        if let Some(text) = select_all_text(&document, css) {
            return clean_text(&text);
        }
    }

    if let Some(expr) = xpath.filter(|s| !s.trim().is_empty()) {
        match xpath_to_css(expr) {
            Some(css) => {
                if let Some(text) = select_all_text(&document, &css) {
                    return clean_text(&text);
                }
            }
            None => tracing::debug!(xpath = expr, "xpath outside supported subset, ignoring"),
        }
    }

    if let Some(main) = find_main_content(&document) {
        return clean_text(&visible_text(main));
    }

    if let Ok(body) = Selector::parse("body") {
        if let Some(el) = document.select(&body).next() {
            return clean_text(&visible_text(el));
        }
    }

    clean_text(&visible_text(document.root_element()))
}

/// Text of every element matching `css`, one block per element.
fn select_all_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let blocks: Vec<String> = document.select(&selector).map(visible_text).collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

fn find_main_content(document: &Html) -> Option<ElementRef<'_>> {
    for css in MAIN_CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let best = document
            .select(&selector)
            .map(|el| (content_len(el), el))
            .max_by_key(|(len, _)| *len);
        if let Some((len, el)) = best {
            if len > MIN_MAIN_CONTENT_CHARS {
                return Some(el);
            }
        }
    }
    None
}

/// Trimmed text nodes under `el`, one per line, skipping non-content tags.
pub fn visible_text(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    collect_text(el, &mut parts);
    parts.join("\n")
}

fn collect_text<'a>(el: ElementRef<'a>, out: &mut Vec<&'a str>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed);
                }
            }
            Node::Element(element) => {
                if SKIPPED_TAGS.contains(&element.name()) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn content_len(el: ElementRef<'_>) -> usize {
    let mut parts = Vec::new();
    collect_text(el, &mut parts);
    parts.iter().map(|p| p.chars().count()).sum()
}

/// Minimal line-level cleanup shared by every extraction path.
///
/// Drops blank lines and cookie/skip-link boilerplate, collapses
/// immediately repeated lines and trims the result.
pub fn clean_text(text: &str) -> String {
    let mut cleaned: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if NOISE_LINES.iter().any(|p| lower.contains(p)) {
            continue;
        }
        if cleaned.last() == Some(&line) {
            continue;
        }
        cleaned.push(line);
    }

    let mut result = cleaned.join("\n");
    while result.contains("\n\n\n") {
        result = result.replace("\n\n\n", "\n\n");
    }
    result.trim().to_string()
}

/// Translate a small XPath subset into an equivalent CSS selector.
///
/// Supported: absolute and descendant location steps (`/`, `//`), element
/// names or `*`, and one predicate per step of the forms `[@attr='v']`,
/// `[@attr]`, `[contains(@attr,'v')]`, `[starts-with(@attr,'v')]` or
/// `[n]`. A trailing `/text()` step is accepted and ignored since
/// extraction always reads text. Anything else returns `None`.
///
/// ```rust
/// use sitewatch_core::extract::xpath_to_css;
///
/// assert_eq!(xpath_to_css("//div[@id='news']//p").as_deref(), Some("div#news p"));
/// assert_eq!(xpath_to_css("//p[last()]"), None);
/// ```
pub fn xpath_to_css(expr: &str) -> Option<String> {
    let expr = expr.trim();
    let expr = expr.strip_suffix("/text()").unwrap_or(expr);
    if !expr.starts_with('/') {
        return None;
    }

    let mut css = String::new();
    let mut rest = expr;
    while !rest.is_empty() {
        let combinator = if let Some(r) = rest.strip_prefix("//") {
            rest = r;
            " "
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
            " > "
        } else {
            return None;
        };

        let end = step_end(rest)?;
        let step = &rest[..end];
        rest = &rest[end..];

        let translated = translate_step(step)?;
        if !css.is_empty() {
            css.push_str(combinator);
        }
        css.push_str(&translated);
    }

    if css.is_empty() {
        None
    } else {
        Some(css)
    }
}

/// Byte offset where the current location step ends (next `/` outside a
/// predicate).
fn step_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.checked_sub(1)?,
            (None, '/') if depth == 0 => return Some(i),
            _ => {}
        }
    }
    if depth == 0 && quote.is_none() {
        Some(s.len())
    } else {
        None
    }
}

fn translate_step(step: &str) -> Option<String> {
    let (name, predicate) = match step.find('[') {
        Some(open) => {
            let inner = step[open..].strip_prefix('[')?.strip_suffix(']')?;
            (&step[..open], Some(inner.trim()))
        }
        None => (step, None),
    };

    if name.is_empty() || !(name == "*" || is_name(name)) {
        return None;
    }
    let element = if name == "*" { "" } else { name };

    let Some(pred) = predicate else {
        return Some(if element.is_empty() { "*".to_string() } else { element.to_string() });
    };

    if let Ok(n) = pred.parse::<u32>() {
        if n == 0 || element.is_empty() {
            return None;
        }
        return Some(format!("{}:nth-of-type({})", element, n));
    }

    for (func, op) in [("contains(", "*="), ("starts-with(", "^=")] {
        if let Some(inner) = pred.strip_prefix(func).and_then(|p| p.strip_suffix(')')) {
            let (attr, value) = inner.split_once(',')?;
            let attr = attr.trim().strip_prefix('@')?;
            let value = unquote(value.trim())?;
            if !is_name(attr) {
                return None;
            }
            return Some(format!("{}[{}{}'{}']", element, attr, op, value));
        }
    }

    let attr_expr = pred.strip_prefix('@')?;
    match attr_expr.split_once('=') {
        Some((attr, value)) => {
            let attr = attr.trim();
            let value = unquote(value.trim())?;
            if !is_name(attr) {
                return None;
            }
            if attr == "id" && is_name(value) {
                Some(format!("{}#{}", element, value))
            } else {
                Some(format!("{}[{}='{}']", element, attr, value))
            }
        }
        None if is_name(attr_expr) => Some(format!("{}[{}]", element, attr_expr)),
        None => None,
    }
}

fn unquote(s: &str) -> Option<&str> {
    let inner = s
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|r| r.strip_suffix('"')))?;
    if inner.contains('\'') {
        None
    } else {
        Some(inner)
    }
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
