// src/page.rs
//! Rendered page handle and the candidate-element view the extractor reads.
//!
//! The extractor only sees the [`PageView`] / [`Candidate`] traits. [`Page`]
//! implements them over fetched HTML with tolerant, case-insensitive tag
//! scanning; tests can plug in their own candidates.

use anyhow::Result;
use once_cell::sync::OnceCell;
use regex::Regex;

/// Body-text lookups tried in order before falling back to the whole
/// candidate's rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStrategy {
    /// Dedicated post-text element (`data-testid="tweetText"`).
    Structured,
    /// A `<span>` nested in a post container.
    NestedSpan,
    /// Any `<span>` in the candidate.
    AnySpan,
}

impl TextStrategy {
    pub const ORDER: [TextStrategy; 3] = [
        TextStrategy::Structured,
        TextStrategy::NestedSpan,
        TextStrategy::AnySpan,
    ];
}

/// One potential post on a page.
pub trait Candidate {
    fn is_pinned(&self) -> Result<bool>;
    /// Non-empty text found by `strategy`, if any.
    fn text(&self, strategy: TextStrategy) -> Result<Option<String>>;
    /// All visible text of the candidate.
    fn rendered_text(&self) -> Result<String>;
    /// Explicit timestamp attribute, if present.
    fn timestamp(&self) -> Result<Option<String>>;
    /// Absolute link to the post, if present.
    fn permalink(&self) -> Result<Option<String>>;
}

/// A loaded page, candidates in document order.
pub trait PageView {
    fn url(&self) -> &str;
    fn candidates(&self) -> Vec<Box<dyn Candidate + '_>>;
}

/// Page obtained by the fetch gateway.
#[derive(Debug, Clone)]
pub struct Page {
    url: String,
    html: String,
    status: u16,
}

impl Page {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self::with_status(url, html, 200)
    }

    pub fn with_status(url: impl Into<String>, html: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            status,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// `scheme://host` of the page URL, used to absolutize relative links.
    pub fn origin(&self) -> String {
        origin_of(&self.url)
    }
}

impl PageView for Page {
    fn url(&self) -> &str {
        &self.url
    }

    fn candidates(&self) -> Vec<Box<dyn Candidate + '_>> {
        let origin = self.origin();
        candidate_blocks(&self.html)
            .into_iter()
            .map(|inner| {
                Box::new(HtmlCandidate {
                    html: inner,
                    origin: origin.clone(),
                }) as Box<dyn Candidate + '_>
            })
            .collect()
    }
}

/// Candidate backed by an HTML fragment.
#[derive(Debug, Clone)]
pub struct HtmlCandidate {
    html: String,
    origin: String,
}

impl HtmlCandidate {
    pub fn new(html: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            origin: origin.into(),
        }
    }
}

impl Candidate for HtmlCandidate {
    fn is_pinned(&self) -> Result<bool> {
        Ok(has_attr_value(&self.html, "data-testid", "icon-pin"))
    }

    fn text(&self, strategy: TextStrategy) -> Result<Option<String>> {
        let found = match strategy {
            TextStrategy::Structured => {
                first_text(elements(&self.html, "div", Some(("data-testid", "tweetText"))))
                    .or_else(|| {
                        first_text(elements(&self.html, "span", Some(("data-testid", "tweetText"))))
                    })
            }
            TextStrategy::NestedSpan => elements(&self.html, "div", Some(("data-testid", "tweet")))
                .into_iter()
                .find_map(|el| first_text(elements(&el.inner, "span", None))),
            TextStrategy::AnySpan => first_text(elements(&self.html, "span", None)),
        };
        Ok(found)
    }

    fn rendered_text(&self) -> Result<String> {
        Ok(render_text(&self.html))
    }

    fn timestamp(&self) -> Result<Option<String>> {
        Ok(open_tags(&self.html, "time")
            .into_iter()
            .next()
            .and_then(|attrs| attr_value(&attrs, "datetime"))
            .filter(|v| !v.trim().is_empty()))
    }

    fn permalink(&self) -> Result<Option<String>> {
        let href = open_tags(&self.html, "a")
            .into_iter()
            .filter_map(|attrs| attr_value(&attrs, "href"))
            .find(|h| h.contains("/status/"));
        Ok(href.map(|h| absolutize(&h, &self.origin)))
    }
}

fn first_text(els: Vec<Element>) -> Option<String> {
    els.into_iter()
        .map(|el| render_text(&el.inner))
        .find(|t| !t.is_empty())
}

/// Post containers in preference order: `<article data-testid="tweet">`,
/// any `<article>`, then any element tagged `data-testid="tweet"`.
fn candidate_blocks(html: &str) -> Vec<String> {
    let tagged = elements(html, "article", Some(("data-testid", "tweet")));
    if !tagged.is_empty() {
        return tagged.into_iter().map(|e| e.inner).collect();
    }
    let articles = elements(html, "article", None);
    if !articles.is_empty() {
        return articles.into_iter().map(|e| e.inner).collect();
    }
    elements(html, "div", Some(("data-testid", "tweet")))
        .into_iter()
        .map(|e| e.inner)
        .collect()
}

#[derive(Debug, Clone)]
struct Element {
    inner: String,
}

/// Any opening or closing tag: `(/?)`, name, raw attribute string.
fn tag_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9-]*)\b([^>]*)>").unwrap())
}

fn attr_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)(?:^|\s)([^\s=/>"']+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
    })
}

fn tag_matches(name: &str, tag: &str) -> bool {
    tag == "*" || name.eq_ignore_ascii_case(tag)
}

/// Attribute strings of every opening `tag` in document order.
fn open_tags(html: &str, tag: &str) -> Vec<String> {
    tag_re()
        .captures_iter(html)
        .filter(|c| c.get(1).is_some_and(|m| m.as_str().is_empty()))
        .filter(|c| c.get(2).is_some_and(|m| tag_matches(m.as_str(), tag)))
        .map(|c| c.get(3).map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect()
}

fn has_attr_value(html: &str, name: &str, value: &str) -> bool {
    open_tags(html, "*")
        .iter()
        .any(|attrs| attr_value(attrs, name).as_deref() == Some(value))
}

/// Elements named `tag` (optionally filtered by an exact attribute value),
/// with their balanced inner HTML. Nested same-name tags are tracked so the
/// inner HTML ends at the matching close tag.
fn elements(html: &str, tag: &str, attr: Option<(&str, &str)>) -> Vec<Element> {
    let mut out = Vec::new();

    for caps in tag_re().captures_iter(html) {
        let (Some(whole), Some(slash), Some(name), Some(attrs)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        if !slash.as_str().is_empty() || !tag_matches(name.as_str(), tag) {
            continue;
        }
        if attrs.as_str().trim_end().ends_with('/') {
            continue;
        }
        if let Some((k, v)) = attr {
            if attr_value(attrs.as_str(), k).as_deref() != Some(v) {
                continue;
            }
        }
        if let Some(end) = matching_close(html, whole.end(), name.as_str()) {
            out.push(Element {
                inner: html[whole.end()..end].to_string(),
            });
        }
    }
    out
}

/// Byte offset of the `</name>` closing the element whose content starts at `from`.
fn matching_close(html: &str, from: usize, name: &str) -> Option<usize> {
    let mut depth = 1usize;
    for caps in tag_re().captures_iter(&html[from..]) {
        if !caps.get(2).is_some_and(|m| m.as_str().eq_ignore_ascii_case(name)) {
            continue;
        }
        let whole = caps.get(0)?;
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        if closing {
            depth -= 1;
            if depth == 0 {
                return Some(from + whole.start());
            }
        } else if !whole.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    None
}

fn attr_value(attrs: &str, name: &str) -> Option<String> {
    let caps = attr_re()
        .captures_iter(attrs)
        .find(|c| c.get(1).is_some_and(|m| m.as_str().eq_ignore_ascii_case(name)))?;
    let raw = caps
        .get(2)
        .or_else(|| caps.get(3))
        .or_else(|| caps.get(4))?
        .as_str();
    Some(html_escape::decode_html_entities(raw).to_string())
}

/// Visible text: tags stripped, entities decoded, whitespace collapsed.
pub fn render_text(html: &str) -> String {
    static RE_DROP: OnceCell<Regex> = OnceCell::new();
    static RE_BREAK: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();

    let re_drop = RE_DROP
        .get_or_init(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
    let re_break = RE_BREAK.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[ \t\r\f\v]+").unwrap());

    let out = re_drop.replace_all(html, " ");
    let out = re_break.replace_all(&out, "\n");
    let out = re_tags.replace_all(&out, " ");
    let out = html_escape::decode_html_entities(&out).to_string();

    out.lines()
        .map(|l| re_ws.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn origin_of(url: &str) -> String {
    match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            let host_end = rest.find('/').unwrap_or(rest.len());
            format!("{}://{}", &url[..i], &rest[..host_end])
        }
        None => String::new(),
    }
}

fn absolutize(href: &str, origin: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{origin}{href}")
    } else {
        format!("{origin}/{href}")
    }
}
