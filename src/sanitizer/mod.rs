//! Allow-list HTML sanitizer for untrusted feed content.
//!
//! Input is tokenized (not parsed into a tree) and re-serialized token by
//! token. Only tags and attributes named in [`SanitizerPolicy`] survive; URLs
//! are resolved against the page's base URL and filtered by scheme and host;
//! scripts, styles, tracking pixels and untrusted iframes are removed.
//! Input that ends inside a tag, comment or doctype produces an empty string.

mod policy;
mod srcset;
mod tokens;
mod url;

pub use policy::SanitizerPolicy;

use html5ever::tokenizer::{Tag, TagKind, Token};

use self::url::{absolute_url, push_escaped, rewrite_embed_url, same_site};

/// Largest image width kept as is; wider images lose both dimensions so
/// they scale to the reading layout.
const MAX_LAYOUT_WIDTH: i64 = 750;

/// Sanitize with the default policy.
pub fn sanitize(base_url: &str, input: &str) -> String {
    Sanitizer::default().sanitize(base_url, input)
}

#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    policy: SanitizerPolicy,
}

/// Per-call state of the token loop.
#[derive(Default)]
struct TagStack {
    open: Vec<String>,
    blacklisted_depth: usize,
    parent_tag: Option<String>,
}

impl Sanitizer {
    pub fn new(policy: SanitizerPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SanitizerPolicy {
        &self.policy
    }

    /// Return a safe rendition of `input`, resolving relative URLs against
    /// `base_url`.
    pub fn sanitize(&self, base_url: &str, input: &str) -> String {
        let Some(tokens) = tokens::tokenize(input) else {
            tracing::debug!(base_url, "Discarding truncated HTML");
            return String::new();
        };

        let mut out = String::with_capacity(input.len());
        let mut state = TagStack::default();

        for token in tokens {
            match token {
                Token::CharacterTokens(text) => {
                    if state.blacklisted_depth > 0 {
                        continue;
                    }
                    // Iframes have no fallback content.
                    if state.parent_tag.as_deref() == Some("iframe") {
                        continue;
                    }
                    push_escaped(&mut out, &text);
                }
                Token::TagToken(tag) => match tag.kind {
                    TagKind::StartTag => self.start_tag(base_url, &tag, &mut state, &mut out),
                    TagKind::EndTag => self.end_tag(&tag, &mut state, &mut out),
                },
                // Comments, doctypes and NUL characters are dropped.
                _ => {}
            }
        }

        out
    }

    fn start_tag(&self, base_url: &str, tag: &Tag, state: &mut TagStack, out: &mut String) {
        let name: &str = &tag.name;
        state.parent_tag = Some(name.to_string());

        if is_pixel_tracker(tag) {
            return;
        }

        if !self.policy.is_allowed_tag(name) {
            if self.policy.is_blocked_tag(name) {
                state.blacklisted_depth += 1;
            }
            return;
        }

        let attributes = self.sanitize_attributes(base_url, tag);
        if !self
            .policy
            .has_required_attributes(name, attributes.iter().map(|(n, _)| *n))
        {
            return;
        }

        // The self-closing flag only means something on void elements.
        let is_void = self.policy.is_void_tag(name);
        let self_closing = is_void && tag.self_closing;

        out.push('<');
        out.push_str(name);
        for (_, rendered) in &attributes {
            out.push(' ');
            out.push_str(rendered);
        }
        out.push_str(if self_closing { "/>" } else { ">" });

        if !is_void {
            state.open.push(name.to_string());
        }
    }

    fn end_tag(&self, tag: &Tag, state: &mut TagStack, out: &mut String) {
        let name: &str = &tag.name;

        if state.parent_tag.as_deref() == Some(name) {
            state.parent_tag = None;
        }

        if self.policy.is_allowed_tag(name) {
            if let Some(position) = state.open.iter().rposition(|open| open == name) {
                state.open.remove(position);
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        } else if self.policy.is_blocked_tag(name) {
            state.blacklisted_depth = state.blacklisted_depth.saturating_sub(1);
        }
    }

    /// Filter, rewrite and render the attributes of an allowed tag, in
    /// source order, followed by the tag's extra attributes.
    fn sanitize_attributes<'t>(&self, base_url: &str, tag: &'t Tag) -> Vec<(&'t str, String)> {
        let name: &str = &tag.name;
        let mut rendered: Vec<(&'t str, String)> = Vec::with_capacity(tag.attrs.len() + 3);
        let mut is_anchor_link = false;

        let oversized_image =
            name == "img" && integer_attribute(tag, "width").is_some_and(|w| w > MAX_LAYOUT_WIDTH);

        for attribute in &tag.attrs {
            let key: &'t str = &attribute.name.local;
            let raw: &str = &attribute.value;

            if !self.policy.is_allowed_attribute(name, key) {
                continue;
            }

            let value = if key == "srcset" && (name == "img" || name == "source") {
                match srcset::sanitize_srcset(&self.policy, base_url, raw) {
                    Some(value) => value,
                    None => continue,
                }
            } else if name == "img" && (key == "width" || key == "height") {
                if !is_positive_integer(raw) || oversized_image {
                    continue;
                }
                raw.to_string()
            } else if self.policy.is_external_resource_attribute(key) {
                if name == "iframe" {
                    match self.iframe_source(base_url, raw) {
                        Some(value) => value,
                        None => continue,
                    }
                } else if name == "img" && key == "src" && self.policy.is_safe_data_image(raw) {
                    raw.to_string()
                } else if name == "a" && key == "href" && raw.starts_with('#') {
                    is_anchor_link = true;
                    raw.to_string()
                } else {
                    match absolute_url(base_url, raw) {
                        Some(url)
                            if self.policy.has_allowed_scheme(&url)
                                && !self.policy.is_blocked_resource(&url) =>
                        {
                            url
                        }
                        _ => continue,
                    }
                }
            } else {
                raw.to_string()
            };

            let mut attr = String::with_capacity(key.len() + value.len() + 3);
            attr.push_str(key);
            attr.push_str("=\"");
            push_escaped(&mut attr, &value);
            attr.push('"');
            rendered.push((key, attr));
        }

        if !is_anchor_link {
            for &(extra_name, extra) in self.policy.extra_attributes(name) {
                rendered.push((extra_name, extra.to_string()));
            }
        }

        rendered
    }

    /// Absolute http(s) iframe source if it is same-site, a trusted embed
    /// origin or the alternate frontend; rewritten to its privacy-preserving
    /// form.
    fn iframe_source(&self, base_url: &str, raw: &str) -> Option<String> {
        let resolved = absolute_url(base_url, raw)?;
        let url = ::url::Url::parse(&resolved).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?;

        let trusted = same_site(base_url, host)
            || self
                .policy
                .is_trusted_iframe_origin(&url.origin().ascii_serialization())
            || self.policy.is_alternate_frontend(host);

        trusted.then(|| rewrite_embed_url(&resolved))
    }
}

fn is_pixel_tracker(tag: &Tag) -> bool {
    if &*tag.name != "img" {
        return false;
    }
    let has = |key: &str| {
        tag.attrs
            .iter()
            .any(|attr| &*attr.name.local == key && &*attr.value == "1")
    };
    has("width") && has("height")
}

fn integer_attribute(tag: &Tag, key: &str) -> Option<i64> {
    tag.attrs
        .iter()
        .find(|attr| &*attr.name.local == key)
        .and_then(|attr| attr.value.trim().parse::<i64>().ok())
}

fn is_positive_integer(value: &str) -> bool {
    value.parse::<i64>().is_ok_and(|n| n > 0)
}
