//! Batch markdown rendering with document-wide reference resolution.
//!
//! Each item field is registered as a fragment. Reference and footnote
//! definitions are lifted out of every fragment into shared tables, so a link
//! in one item may point at a definition declared in another. Parsing happens
//! in [`FragmentStore::resolve_all`], once every fragment of the batch is
//! known; serialization happens per fragment afterwards.

use std::collections::{HashMap, HashSet};

use pulldown_cmark::{
    BrokenLink, BrokenLinkCallback, CowStr, Event, LinkType, Options, Parser, Tag, TagEnd, html,
};

use super::{postprocess::PostProcessor, types::RenderError};
use crate::util::html::escape_html;

const FOOTNOTE_PREFIX: &str = "#fn:";

/// Opaque reference to a registered fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentHandle {
    epoch: u64,
    index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkDefinition {
    dest: String,
    title: String,
}

#[derive(Debug, Default)]
struct Definitions {
    references: HashMap<String, LinkDefinition>,
    footnotes: HashMap<String, String>,
}

/// What the parser looked up while resolving the current batch.
#[derive(Debug, Default)]
struct Usage {
    references: Vec<String>,
    seen_references: HashSet<String>,
    footnotes: Vec<String>,
    /// Markers emitted so far per footnote label; keeps `fnref` ids unique.
    citations: HashMap<String, usize>,
    undefined: HashSet<String>,
}

impl Usage {
    fn footnote_number(&self, label: &str) -> Option<usize> {
        self.footnotes
            .iter()
            .position(|used| used == label)
            .map(|index| index + 1)
    }

    fn cite(&mut self, label: &str) -> usize {
        let count = self.citations.entry(label.to_string()).or_default();
        *count += 1;
        *count
    }
}

#[derive(Debug)]
struct Fragment {
    source: String,
    definitions: Vec<String>,
    events: Option<Vec<Event<'static>>>,
}

pub struct FragmentStore {
    epoch: u64,
    options: Options,
    fragments: Vec<Option<Fragment>>,
    definitions: Definitions,
    usage: Usage,
    footer: Option<Vec<Event<'static>>>,
    post_processors: Vec<Box<dyn PostProcessor>>,
}

impl FragmentStore {
    pub fn new(post_processors: Vec<Box<dyn PostProcessor>>) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_SMART_PUNCTUATION);

        Self {
            epoch: 0,
            options,
            fragments: Vec::new(),
            definitions: Definitions::default(),
            usage: Usage::default(),
            footer: None,
            post_processors,
        }
    }

    /// Drop every fragment, definition and usage record. Handles issued
    /// before the reset render to the empty string.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.fragments.clear();
        self.definitions = Definitions::default();
        self.usage = Usage::default();
        self.footer = None;
    }

    /// Start a batch that reuses the definition tables of earlier batches.
    /// Fragments left over from the previous batch are dropped and their
    /// handles render to the empty string; footnote numbering carries over.
    pub fn begin_batch(&mut self) {
        self.epoch += 1;
        self.fragments.clear();
        self.usage.undefined.clear();
        self.footer = None;
    }

    /// Queue `source` for the next [`resolve_all`](Self::resolve_all).
    /// Blank input yields no handle.
    pub fn register_fragment(&mut self, source: &str) -> Option<FragmentHandle> {
        if source.trim().is_empty() {
            return None;
        }

        let extracted = extract_definitions(source);
        for (label, definition) in extracted.references {
            self.definitions
                .references
                .entry(label)
                .or_insert(definition);
        }
        for (label, text) in extracted.footnotes {
            self.definitions.footnotes.entry(label).or_insert(text);
        }

        let index = self.fragments.len();
        self.fragments.push(Some(Fragment {
            source: extracted.body,
            definitions: extracted.raw,
            events: None,
        }));

        Some(FragmentHandle {
            epoch: self.epoch,
            index,
        })
    }

    /// Raw definition lines lifted out of the fragment, in source order.
    pub fn declared_definitions(&self, handle: FragmentHandle) -> &[String] {
        self.fragment(handle)
            .map(|fragment| fragment.definitions.as_slice())
            .unwrap_or_default()
    }

    /// Parse every pending fragment against the shared definition tables.
    pub fn resolve_all(&mut self) {
        let Self {
            options,
            fragments,
            definitions,
            usage,
            ..
        } = self;

        for fragment in fragments.iter_mut().flatten() {
            if fragment.events.is_none() {
                fragment.events = Some(parse_fragment(
                    &fragment.source,
                    *options,
                    definitions,
                    usage,
                ));
            }
        }
        self.footer = None;
    }

    /// Serialize one resolved fragment and release it.
    pub fn render_fragment(&mut self, handle: Option<FragmentHandle>) -> Result<String, RenderError> {
        let Some(handle) = handle else {
            return Ok(String::new());
        };
        if handle.epoch != self.epoch {
            return Ok(String::new());
        }
        let Some(slot) = self.fragments.get_mut(handle.index) else {
            return Ok(String::new());
        };
        if slot.as_ref().is_some_and(|fragment| fragment.events.is_none()) {
            return Err(RenderError::Unresolved);
        }
        let Some(events) = slot.take().and_then(|fragment| fragment.events) else {
            return Ok(String::new());
        };

        let mut output = String::new();
        html::push_html(&mut output, events.into_iter());
        self.post_process(output)
    }

    /// Collected footnotes and used references of the resolved batch. Built
    /// on first use, so batches that never ask for it skip the work.
    pub fn render_footer(&mut self) -> Result<String, RenderError> {
        if self.footer.is_none() {
            let built = build_footer(self.options, &self.definitions, &mut self.usage);
            self.footer = Some(built);
        }
        let Some(footer) = self.footer.as_ref().filter(|footer| !footer.is_empty()) else {
            return Ok(String::new());
        };
        let mut output = String::new();
        html::push_html(&mut output, footer.iter().cloned());
        self.post_process(output)
    }

    /// Labels that were looked up but never defined.
    pub fn undefined_references(&self) -> impl Iterator<Item = &str> {
        self.usage.undefined.iter().map(String::as_str)
    }

    fn fragment(&self, handle: FragmentHandle) -> Option<&Fragment> {
        if handle.epoch != self.epoch {
            return None;
        }
        self.fragments.get(handle.index)?.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn retained_fragments(&self) -> usize {
        self.fragments.len()
    }

    fn post_process(&self, html: String) -> Result<String, RenderError> {
        self.post_processors
            .iter()
            .try_fold(html, |html, step| step.run(html))
    }
}

struct Resolver<'a> {
    definitions: &'a Definitions,
    usage: &'a mut Usage,
}

impl<'input> BrokenLinkCallback<'input> for Resolver<'_> {
    fn handle_broken_link(
        &mut self,
        link: BrokenLink<'input>,
    ) -> Option<(CowStr<'input>, CowStr<'input>)> {
        let label = normalize_label(&link.reference);

        if let Some(footnote) = label.strip_prefix('^') {
            if self.definitions.footnotes.contains_key(footnote) {
                if self.usage.footnote_number(footnote).is_none() {
                    self.usage.footnotes.push(footnote.to_string());
                }
                let dest = format!("{FOOTNOTE_PREFIX}{footnote}");
                return Some((dest.into(), CowStr::Borrowed("")));
            }
        } else if let Some(definition) = self.definitions.references.get(&label) {
            if self.usage.seen_references.insert(label.clone()) {
                self.usage.references.push(label);
            }
            return Some((
                definition.dest.clone().into(),
                definition.title.clone().into(),
            ));
        }

        // Unknown labels resolve to an empty target carrying the raw label as
        // title; the link is unwrapped back to its bracket text afterwards.
        self.usage.undefined.insert(label);
        Some((CowStr::Borrowed(""), link.reference))
    }
}

fn parse_fragment(
    source: &str,
    options: Options,
    definitions: &Definitions,
    usage: &mut Usage,
) -> Vec<Event<'static>> {
    let resolver = Resolver {
        definitions,
        usage: &mut *usage,
    };
    let events: Vec<Event<'static>> =
        Parser::new_with_broken_link_callback(source, options, Some(resolver))
            .map(Event::into_static)
            .collect();
    rewrite_callback_links(events, usage)
}

/// Turn footnote links into numbered markers and unknown references back into
/// their literal bracket text.
fn rewrite_callback_links(events: Vec<Event<'static>>, usage: &mut Usage) -> Vec<Event<'static>> {
    let mut output = Vec::with_capacity(events.len());
    // Closing text for links being unwrapped; `None` marks a footnote marker
    // whose inner events are dropped.
    let mut open: Vec<Option<Option<String>>> = Vec::new();

    for event in events {
        match event {
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) if is_callback_link(link_type) && open_is_plain(&open) => {
                if let Some(label) = dest_url.strip_prefix(FOOTNOTE_PREFIX) {
                    let number = usage.footnote_number(label).unwrap_or_default();
                    let citation = usage.cite(label);
                    output.push(Event::InlineHtml(
                        footnote_marker(label, number, citation).into(),
                    ));
                    open.push(Some(None));
                } else if dest_url.is_empty() {
                    output.push(Event::Text("[".into()));
                    open.push(Some(Some(closing_brackets(link_type, &title))));
                } else {
                    output.push(Event::Start(Tag::Link {
                        link_type,
                        dest_url,
                        title,
                        id,
                    }));
                    open.push(None);
                }
            }
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) => {
                let skipping = !open_is_plain(&open);
                if !skipping {
                    output.push(Event::Start(Tag::Link {
                        link_type,
                        dest_url,
                        title,
                        id,
                    }));
                }
                open.push(None);
            }
            Event::End(TagEnd::Link) => match open.pop() {
                Some(Some(Some(closing))) => output.push(Event::Text(closing.into())),
                Some(Some(None)) => {}
                _ => {
                    if open_is_plain(&open) {
                        output.push(Event::End(TagEnd::Link));
                    }
                }
            },
            other => {
                if open_is_plain(&open) {
                    output.push(other);
                }
            }
        }
    }

    output
}

/// False while inside a footnote marker whose content is being dropped.
fn open_is_plain(open: &[Option<Option<String>>]) -> bool {
    !open.iter().any(|entry| matches!(entry, Some(None)))
}

fn is_callback_link(link_type: LinkType) -> bool {
    matches!(
        link_type,
        LinkType::ReferenceUnknown | LinkType::CollapsedUnknown | LinkType::ShortcutUnknown
    )
}

fn closing_brackets(link_type: LinkType, reference: &str) -> String {
    match link_type {
        LinkType::ReferenceUnknown => format!("][{reference}]"),
        LinkType::CollapsedUnknown => "][]".to_string(),
        _ => "]".to_string(),
    }
}

fn footnote_anchor(label: &str) -> String {
    escape_html(&label.split_whitespace().collect::<Vec<_>>().join("-"))
}

/// `fnref:2` for the first citation of footnote 2, `fnref:2:3` for its third.
fn citation_id(number: usize, citation: usize) -> String {
    if citation <= 1 {
        format!("fnref:{number}")
    } else {
        format!("fnref:{number}:{citation}")
    }
}

fn footnote_marker(label: &str, number: usize, citation: usize) -> String {
    format!(
        r##"<sup class="footnote-ref" id="{id}"><a href="#fn:{anchor}">{number}</a></sup>"##,
        id = citation_id(number, citation),
        anchor = footnote_anchor(label)
    )
}

fn build_footer(options: Options, definitions: &Definitions, usage: &mut Usage) -> Vec<Event<'static>> {
    let mut footer = Vec::new();

    if !usage.footnotes.is_empty() {
        footer.push(Event::Html(
            "<section class=\"footnotes\">\n<hr>\n<ol>\n".into(),
        ));
        // Footnote bodies may cite further footnotes, which extends the list.
        let mut index = 0;
        while index < usage.footnotes.len() {
            let label = usage.footnotes[index].clone();
            let number = index + 1;
            let text = definitions
                .footnotes
                .get(&label)
                .cloned()
                .unwrap_or_default();
            footer.push(Event::Html(
                format!("<li id=\"fn:{}\">\n", footnote_anchor(&label)).into(),
            ));
            footer.extend(parse_fragment(&text, options, definitions, usage));
            let citations = usage.citations.get(&label).copied().unwrap_or(1).max(1);
            let mut backrefs = String::new();
            for citation in 1..=citations {
                backrefs.push_str(&format!(
                    "<a href=\"#{}\" class=\"footnote-backref\">&#8617;</a>",
                    citation_id(number, citation)
                ));
            }
            footer.push(Event::Html(format!("{backrefs}\n</li>\n").into()));
            index += 1;
        }
        footer.push(Event::Html("</ol>\n</section>\n".into()));
    }

    if !usage.references.is_empty() {
        footer.push(Event::Html(
            "<section class=\"references\">\n<ul>\n".into(),
        ));
        for label in &usage.references {
            let Some(definition) = definitions.references.get(label) else {
                continue;
            };
            let mut entry = format!(
                "<li><a href=\"{}\">{}</a>",
                escape_html(&definition.dest),
                escape_html(label)
            );
            if !definition.title.is_empty() {
                entry.push_str(&format!(" {}", escape_html(&definition.title)));
            }
            entry.push_str("</li>\n");
            footer.push(Event::Html(entry.into()));
        }
        footer.push(Event::Html("</ul>\n</section>\n".into()));
    }

    footer
}

/// Lowercase, trim and collapse inner whitespace.
fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Default)]
struct Extracted {
    body: String,
    raw: Vec<String>,
    references: Vec<(String, LinkDefinition)>,
    footnotes: Vec<(String, String)>,
}

/// Line-level pass: normalize line endings and lift single-line reference
/// definitions and footnote definitions out of the text. Fenced code is
/// copied verbatim.
fn extract_definitions(source: &str) -> Extracted {
    let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();

    let mut extracted = Extracted::default();
    let mut body: Vec<&str> = Vec::with_capacity(lines.len());
    let mut fence: Option<(char, usize)> = None;
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];

        if let Some((marker, length)) = fence {
            if closes_fence(line, marker, length) {
                fence = None;
            }
            body.push(line);
            index += 1;
            continue;
        }
        if let Some(opened) = opens_fence(line) {
            fence = Some(opened);
            body.push(line);
            index += 1;
            continue;
        }

        if let Some((label, first)) = parse_footnote_definition(line) {
            let mut raw = vec![line.trim_end()];
            let mut text = vec![first.to_string()];
            let mut next = index + 1;
            while next < lines.len() {
                let candidate = lines[next];
                if is_indented(candidate) {
                    raw.push(candidate.trim_end());
                    text.push(strip_indent(candidate).to_string());
                    next += 1;
                } else if candidate.trim().is_empty()
                    && lines.get(next + 1).is_some_and(|after| is_indented(after))
                {
                    raw.push("");
                    text.push(String::new());
                    next += 1;
                } else {
                    break;
                }
            }
            extracted.raw.push(raw.join("\n"));
            extracted
                .footnotes
                .push((label, text.join("\n").trim().to_string()));
            index = next;
            continue;
        }

        if let Some((label, definition)) = parse_reference_definition(line) {
            extracted.raw.push(line.trim().to_string());
            extracted.references.push((label, definition));
            index += 1;
            continue;
        }

        body.push(line);
        index += 1;
    }

    extracted.body = body.join("\n");
    extracted
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_indented(line: &str) -> bool {
    line.starts_with('\t') || leading_spaces(line) >= 4
}

fn strip_indent(line: &str) -> &str {
    line.strip_prefix('\t')
        .or_else(|| line.strip_prefix("    "))
        .unwrap_or(line)
}

fn opens_fence(line: &str) -> Option<(char, usize)> {
    if leading_spaces(line) > 3 {
        return None;
    }
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next().filter(|ch| *ch == '`' || *ch == '~')?;
    let length = trimmed.chars().take_while(|ch| *ch == marker).count();
    if length < 3 {
        return None;
    }
    if marker == '`' && trimmed[length..].contains('`') {
        return None;
    }
    Some((marker, length))
}

fn closes_fence(line: &str, marker: char, length: usize) -> bool {
    if leading_spaces(line) > 3 {
        return false;
    }
    let trimmed = line.trim();
    trimmed.chars().take_while(|ch| *ch == marker).count() >= length
        && trimmed.chars().all(|ch| ch == marker)
}

/// `[^label]: text`
fn parse_footnote_definition(line: &str) -> Option<(String, &str)> {
    if leading_spaces(line) > 3 {
        return None;
    }
    let rest = line.trim_start().strip_prefix("[^")?;
    let (label, after) = rest.split_once("]:")?;
    let label = normalize_label(label);
    if label.is_empty() || label.contains('[') || label.contains(']') {
        return None;
    }
    Some((label, after.trim()))
}

/// `[label]: destination "optional title"` on a single line.
fn parse_reference_definition(line: &str) -> Option<(String, LinkDefinition)> {
    if leading_spaces(line) > 3 {
        return None;
    }
    let rest = line.trim_start().strip_prefix('[')?;
    if rest.starts_with('^') {
        return None;
    }
    let (label, after) = rest.split_once("]:")?;
    let label = normalize_label(label);
    if label.is_empty() || label.contains('[') || label.contains(']') {
        return None;
    }

    let after = after.trim();
    let (dest, remainder) = if let Some(bracketed) = after.strip_prefix('<') {
        let (dest, remainder) = bracketed.split_once('>')?;
        (dest, remainder)
    } else {
        let end = after.find(char::is_whitespace).unwrap_or(after.len());
        (&after[..end], &after[end..])
    };
    if dest.is_empty() && !after.starts_with('<') {
        return None;
    }

    let remainder = remainder.trim();
    let title = if remainder.is_empty() {
        String::new()
    } else {
        let mut chars = remainder.chars();
        let open = chars.next()?;
        let close = match open {
            '"' => '"',
            '\'' => '\'',
            '(' => ')',
            _ => return None,
        };
        let inner = remainder[open.len_utf8()..].strip_suffix(close)?;
        inner.to_string()
    };

    Some((
        label,
        LinkDefinition {
            dest: dest.to_string(),
            title,
        },
    ))
}
