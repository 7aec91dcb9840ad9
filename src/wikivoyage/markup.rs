//! Section tree for raw wikitext.
//!
//! Headings split the page into nested sections; each section keeps its own
//! body text together with the template invocations and page links found
//! directly inside that body (not inside its subsections).

use regex::Regex;
use std::sync::LazyLock;

use super::text;

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?(-->|$)").unwrap());
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(={1,6})\s*(.*?)\s*(={1,6})\s*$").unwrap());
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]|]*)(?:\|[^\[\]]*)?\]\]").unwrap());

/// Link namespaces that never name another guide page
const IGNORED_NAMESPACES: &[&str] = &[
    "file", "image", "category", "media", "wikipedia", "w", "commons", "wikt", "template",
    "user", "special",
];

/// One argument of a template invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateArg {
    /// `None` for positional arguments
    pub name: Option<String>,
    pub value: String,
}

/// A `{{name|arg|key=value}}` invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub args: Vec<TemplateArg>,
}

impl Template {
    /// Value of a named argument, matched case-insensitively
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .rev()
            .find(|a| {
                a.name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .map(|a| a.value.as_str())
    }
}

/// A node of the heading hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// `None` for the untitled lead section at the root
    pub title: Option<String>,
    /// Heading level (number of `=`), 0 for the root
    pub level: usize,
    pub body: String,
    pub templates: Vec<Template>,
    /// Page names referenced by `[[...]]` links in the body
    pub links: Vec<String>,
    pub children: Vec<Section>,
}

impl Section {
    fn new(title: Option<String>, level: usize) -> Self {
        Self {
            title,
            level,
            body: String::new(),
            templates: Vec::new(),
            links: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Fill in templates and links once the body is complete
    fn finish(mut self) -> Self {
        extract_templates(&self.body, &mut self.templates);
        self.links = extract_links(&self.body);
        self
    }
}

/// Parse raw wikitext into a section tree rooted at the lead section.
///
/// Heading-like lines inside a complete template are treated as body text.
/// An unterminated `{{` is plain text and does not hide later headings.
pub fn parse_document(raw: &str) -> Section {
    let cleaned = COMMENT.replace_all(raw, "");
    let spans = template_spans(&cleaned);

    let mut stack: Vec<Section> = vec![Section::new(None, 0)];
    let mut next_span = 0;
    let mut offset = 0;

    for chunk in cleaned.split_inclusive('\n') {
        let start = offset;
        offset += chunk.len();
        let line = chunk.strip_suffix('\n').unwrap_or(chunk);
        let line = line.strip_suffix('\r').unwrap_or(line);

        while spans.get(next_span).is_some_and(|&(_, end)| end < start) {
            next_span += 1;
        }
        let in_template = spans
            .get(next_span)
            .is_some_and(|&(open, _)| open < start);

        if !in_template {
            if let Some(caps) = HEADING.captures(line) {
                let level = caps[1].len().min(caps[3].len());
                let title = text::strip_markup(&caps[2]).trim().to_string();

                while stack.len() > 1 && stack.last().is_some_and(|s| s.level >= level) {
                    close_top(&mut stack);
                }
                stack.push(Section::new(Some(title), level));
                continue;
            }
        }

        if let Some(current) = stack.last_mut() {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }

    while stack.len() > 1 {
        close_top(&mut stack);
    }

    match stack.pop() {
        Some(root) => root.finish(),
        None => Section::new(None, 0),
    }
}

fn close_top(stack: &mut Vec<Section>) {
    if let Some(section) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(section.finish());
        }
    }
}

fn is_open(bytes: &[u8], i: usize) -> bool {
    i + 1 < bytes.len()
        && ((bytes[i] == b'{' && bytes[i + 1] == b'{') || (bytes[i] == b'[' && bytes[i + 1] == b'['))
}

fn is_close(bytes: &[u8], i: usize) -> bool {
    i + 1 < bytes.len()
        && ((bytes[i] == b'}' && bytes[i + 1] == b'}') || (bytes[i] == b']' && bytes[i + 1] == b']'))
}

/// Byte offset of the `}}` closing the template opened at `start`
fn find_template_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(i);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

/// Positions of `sep` outside nested templates and links
fn top_level_positions(text: &str, sep: u8) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut positions = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if is_open(bytes, i) {
            depth += 1;
            i += 2;
            continue;
        }
        if is_close(bytes, i) {
            depth = depth.saturating_sub(1);
            i += 2;
            continue;
        }
        if depth == 0 && bytes[i] == sep {
            positions.push(i);
        }
        i += 1;
    }
    positions
}

fn parse_template(inner: &str) -> Template {
    let mut parts = Vec::new();
    let mut start = 0;
    for pos in top_level_positions(inner, b'|') {
        parts.push(&inner[start..pos]);
        start = pos + 1;
    }
    parts.push(&inner[start..]);

    let name = parts[0].trim().to_string();
    let args = parts[1..]
        .iter()
        .map(|part| match top_level_positions(part, b'=').first() {
            Some(&eq) => TemplateArg {
                name: Some(part[..eq].trim().to_string()),
                value: part[eq + 1..].trim().to_string(),
            },
            None => TemplateArg {
                name: None,
                value: part.trim().to_string(),
            },
        })
        .collect();

    Template { name, args }
}

/// Byte ranges `(open, close)` of the outermost complete templates, where
/// `open` indexes the `{{` and `close` the matching `}}`. A `{{` that is
/// never closed is skipped as plain text.
fn template_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            match find_template_end(bytes, i) {
                Some(end) => {
                    spans.push((i, end));
                    i = end + 2;
                }
                None => i += 2,
            }
        } else {
            i += 1;
        }
    }
    spans
}

/// Collect template invocations in document order; nested invocations
/// follow the template that contains them.
pub fn extract_templates(text: &str, out: &mut Vec<Template>) {
    for (open, close) in template_spans(text) {
        let inner = &text[open + 2..close];
        out.push(parse_template(inner));
        extract_templates(inner, out);
    }
}

/// Remove every complete template invocation from `text`
pub fn strip_templates(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    for (open, close) in template_spans(text) {
        out.push_str(&text[copied..open]);
        copied = close + 2;
    }
    out.push_str(&text[copied..]);
    out
}

/// Page names referenced by internal links, in order of appearance
pub fn extract_links(text: &str) -> Vec<String> {
    LINK.captures_iter(text)
        .filter_map(|caps| normalize_link_target(&caps[1]))
        .collect()
}

fn normalize_link_target(raw: &str) -> Option<String> {
    let target = raw.trim().trim_start_matches(':');
    let target = match target.find('#') {
        Some(pos) => &target[..pos],
        None => target,
    };
    let target = target.replace('_', " ");
    let target = target.trim();
    if target.is_empty() {
        return None;
    }

    if let Some((prefix, _)) = target.split_once(':') {
        let prefix = prefix.trim().to_lowercase();
        if IGNORED_NAMESPACES.contains(&prefix.as_str()) {
            return None;
        }
    }

    Some(target.to_string())
}
