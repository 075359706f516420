//! Text-level passes applied to every rendered fragment.

use std::{collections::HashSet, path::Path};

use ammonia::Builder as AmmoniaBuilder;
use lol_html::{RewriteStrSettings, element, rewrite_str};
use url::Url;

use super::types::{RenderError, RenderOptions};

/// A step run over fragment HTML after markdown serialization.
pub trait PostProcessor: Send {
    fn name(&self) -> &'static str;

    fn run(&self, html: String) -> Result<String, RenderError>;
}

/// Build the configured chain for documents rooted at `root`.
pub fn build_chain(options: &RenderOptions, root: &Path) -> Vec<Box<dyn PostProcessor>> {
    let mut chain: Vec<Box<dyn PostProcessor>> = Vec::new();
    if options.sanitize {
        chain.push(Box::new(Sanitizer::new()));
    }
    if options.resolve_resources {
        match ResourceLinks::new(root) {
            Some(links) => chain.push(Box::new(links)),
            None => tracing::warn!(
                target = "reqview::render::postprocess",
                root = %root.display(),
                "Render root is not an absolute path; relative links stay untouched"
            ),
        }
    }
    chain
}

/// Strips markup outside an allow-list tuned for markdown output.
pub struct Sanitizer {
    builder: AmmoniaBuilder<'static>,
}

impl Sanitizer {
    pub fn new() -> Self {
        let mut builder = AmmoniaBuilder::default();

        let tags: HashSet<&'static str> = HashSet::from([
            "a",
            "abbr",
            "blockquote",
            "br",
            "code",
            "del",
            "div",
            "em",
            "h1",
            "h2",
            "h3",
            "h4",
            "h5",
            "h6",
            "hr",
            "img",
            "input",
            "kbd",
            "li",
            "ol",
            "p",
            "pre",
            "s",
            "section",
            "span",
            "strong",
            "sub",
            "sup",
            "table",
            "tbody",
            "td",
            "th",
            "thead",
            "tr",
            "ul",
        ]);
        builder.tags(tags);

        let generic: HashSet<&'static str> = HashSet::from(["class", "id", "title", "lang"]);
        builder.generic_attributes(generic);

        builder.add_tag_attributes("img", &["alt", "width", "height"]);
        builder.add_tag_attributes("th", &["align", "colspan", "rowspan"]);
        builder.add_tag_attributes("td", &["align", "colspan", "rowspan"]);
        builder.add_tag_attributes("input", &["type", "checked", "disabled"]);
        builder.add_tag_attributes("code", &["class"]);
        builder.add_url_schemes(&["file"]);
        builder.link_rel(None);

        Self { builder }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor for Sanitizer {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    fn run(&self, html: String) -> Result<String, RenderError> {
        Ok(self.builder.clean(&html).to_string())
    }
}

/// Rewrites relative `img[src]` and `a[href]` into absolute `file://` URLs.
pub struct ResourceLinks {
    base: Url,
}

impl ResourceLinks {
    /// `None` when `root` cannot be expressed as a directory URL.
    pub fn new(root: &Path) -> Option<Self> {
        let base = Url::from_directory_path(root).ok()?;
        Some(Self { base })
    }

    fn resolve(&self, target: &str) -> Option<String> {
        let trimmed = target.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("//")
            || Url::parse(trimmed).is_ok()
        {
            return None;
        }
        self.base.join(trimmed).ok().map(String::from)
    }
}

impl PostProcessor for ResourceLinks {
    fn name(&self) -> &'static str {
        "resolve_resources"
    }

    fn run(&self, html: String) -> Result<String, RenderError> {
        if !html.contains("src=") && !html.contains("href=") {
            return Ok(html);
        }

        rewrite_str(
            &html,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!("img[src]", |el| {
                        if let Some(src) = el.get_attribute("src")
                            && let Some(resolved) = self.resolve(&src)
                        {
                            el.set_attribute("src", &resolved)?;
                        }
                        Ok(())
                    }),
                    element!("a[href]", |el| {
                        if let Some(href) = el.get_attribute("href")
                            && let Some(resolved) = self.resolve(&href)
                        {
                            el.set_attribute("href", &resolved)?;
                        }
                        Ok(())
                    }),
                ],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| RenderError::post_process(self.name(), err.to_string()))
    }
}
