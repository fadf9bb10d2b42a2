//! HTML → plain text extraction.
//!
//! Pipeline: parse leniently, pick a main-content root, drop boilerplate
//! subtrees (navigation, ads, cookie banners, ...), collect text with block
//! separation, collapse whitespace. The output feeds an LLM summarizer, so
//! clean prose matters more than document structure.

use scraper::{ElementRef, Html, Node, Selector};

/// A root candidate with at least this much non-boilerplate text is taken
/// without looking further down the cascade.
const ROOT_TEXT_THRESHOLD: usize = 50;

/// Class/id tokens that mark boilerplate containers.
///
/// Token match is exact: "nav" matches `class="nav"` but not
/// `class="navigate"`.
const BOILERPLATE_TOKENS: &[&str] = &[
    "nav",
    "navbar",
    "navigation",
    "header",
    "footer",
    "sidebar",
    "menu",
    "breadcrumb",
    "breadcrumbs",
    "advertisement",
    "ad",
    "ads",
    "social",
    "share",
    "sharing",
    "comment",
    "comments",
    "related",
    "recommended",
    "popular",
    "trending",
    "subscribe",
    "newsletter",
    "cookie",
    "cookies",
    "banner",
    "popup",
    "modal",
    "overlay",
];

/// Extract the main text of an HTML document. Returns an empty string when
/// nothing useful survives boilerplate removal.
#[must_use]
pub fn extract_text(html: &str) -> String {
    let html = html.strip_prefix('\u{FEFF}').unwrap_or(html).trim_start();
    let document = Html::parse_document(html);

    let Some(root) = find_content_root(&document) else {
        return String::new();
    };

    let mut blocks: Vec<String> = Vec::new();
    collect_text(root, &mut blocks);

    blocks.join("\n\n")
}

/// Does this look like an HTML document? Used when the Content-Type header
/// is absent or unhelpful.
#[must_use]
pub fn looks_like_html(text: &str) -> bool {
    let prefix: String = text
        .trim_start()
        .chars()
        .take(512)
        .collect::<String>()
        .to_ascii_lowercase();
    prefix.starts_with("<!doctype") || prefix.starts_with("<html") || prefix.contains("<body")
}

/// Cap a string at `max_chars` characters, on a char boundary.
#[must_use]
pub fn truncate_chars(mut text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => {
            text.truncate(byte_index);
            text
        }
        None => text,
    }
}

/// Pick the extraction root. Tries, in order: `main`, `article`,
/// `[role="main"]`, `#content`, `.content`, `body`; the first candidate with
/// enough non-boilerplate text wins, otherwise the densest non-empty one.
fn find_content_root(document: &Html) -> Option<ElementRef<'_>> {
    const ROOT_SELECTORS: &[&str] = &[
        "main",
        "article",
        "[role=\"main\"]",
        "#content",
        ".content",
        "body",
    ];

    let mut best: Option<(usize, ElementRef<'_>)> = None;

    for selector_str in ROOT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            for element in document.select(&selector) {
                let len = non_boilerplate_text_len(element);
                if len >= ROOT_TEXT_THRESHOLD {
                    return Some(element);
                }
                if len > 0 && best.as_ref().is_none_or(|(best_len, _)| len > *best_len) {
                    best = Some((len, element));
                }
            }
        }
    }

    best.map(|(_, element)| element)
}

fn non_boilerplate_text_len(element: ElementRef<'_>) -> usize {
    if is_boilerplate_element(element) {
        return 0;
    }

    let mut count = 0;
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                count += text.chars().filter(|c| !c.is_whitespace()).count();
            }
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    count += non_boilerplate_text_len(el);
                }
            }
            _ => {}
        }
    }
    count
}

fn is_boilerplate_element(element: ElementRef<'_>) -> bool {
    let tag = element.value().name();

    if matches!(
        tag,
        "script"
            | "style"
            | "noscript"
            | "template"
            | "nav"
            | "footer"
            | "header"
            | "aside"
            | "form"
            | "iframe"
            | "svg"
    ) {
        return true;
    }

    let value = element.value();
    let class_tokens = value.attr("class").into_iter().flat_map(split_tokens);
    let id_tokens = value.attr("id").into_iter().flat_map(split_tokens);

    class_tokens
        .chain(id_tokens)
        .any(|token| BOILERPLATE_TOKENS.contains(&token.to_lowercase().as_str()))
}

fn split_tokens(attr: &str) -> impl Iterator<Item = &str> {
    attr.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// Depth-first text collection. Block-level elements start a new block;
/// inline content accumulates into the current one.
fn collect_text(element: ElementRef<'_>, blocks: &mut Vec<String>) {
    if is_boilerplate_element(element) {
        return;
    }

    let mut current = String::new();
    collect_inline(element, blocks, &mut current);
    push_block(blocks, &current);
}

fn collect_inline(element: ElementRef<'_>, blocks: &mut Vec<String>, current: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                current.push_str(text);
            }
            Node::Element(el) => {
                let Some(child_ref) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_boilerplate_element(child_ref) {
                    continue;
                }
                if is_block_element(el.name()) {
                    push_block(blocks, current);
                    current.clear();
                    collect_inline(child_ref, blocks, current);
                    push_block(blocks, current);
                    current.clear();
                } else {
                    collect_inline(child_ref, blocks, current);
                }
            }
            _ => {}
        }
    }
}

fn is_block_element(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "ul"
            | "ol"
            | "li"
            | "table"
            | "tr"
            | "blockquote"
            | "pre"
            | "br"
            | "figure"
            | "figcaption"
            | "dl"
            | "dt"
            | "dd"
    )
}

fn push_block(blocks: &mut Vec<String>, text: &str) {
    let collapsed = collapse_whitespace(text);
    if !collapsed.is_empty() {
        blocks.push(collapsed);
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
