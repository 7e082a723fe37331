use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// Static Tables
// ============================================================================

/// Tag name -> attributes that may appear on it. Tags not listed are dropped.
const TAG_ALLOW_LIST: &[(&str, &[&str])] = &[
    ("img", &["alt", "title", "src", "srcset", "sizes", "width", "height"]),
    ("picture", &[]),
    ("audio", &["src"]),
    ("video", &["poster", "height", "width", "src"]),
    ("source", &["src", "type", "srcset", "sizes", "media"]),
    ("dt", &["id"]),
    ("dd", &["id"]),
    ("dl", &["id"]),
    ("table", &[]),
    ("caption", &[]),
    ("thead", &[]),
    ("tbody", &[]),
    ("tfoot", &[]),
    ("tr", &[]),
    ("td", &["rowspan", "colspan"]),
    ("th", &["rowspan", "colspan"]),
    ("h1", &["id"]),
    ("h2", &["id"]),
    ("h3", &["id"]),
    ("h4", &["id"]),
    ("h5", &["id"]),
    ("h6", &["id"]),
    ("strong", &[]),
    ("em", &[]),
    ("code", &[]),
    ("pre", &[]),
    ("blockquote", &[]),
    ("q", &["cite"]),
    ("p", &[]),
    ("ul", &["id"]),
    ("li", &["id"]),
    ("ol", &["id"]),
    ("br", &[]),
    ("del", &[]),
    ("a", &["href", "title", "id"]),
    ("figure", &[]),
    ("figcaption", &[]),
    ("cite", &[]),
    ("time", &["datetime"]),
    ("abbr", &["title"]),
    ("acronym", &["title"]),
    ("wbr", &[]),
    ("dfn", &[]),
    ("sub", &[]),
    ("sup", &[]),
    ("var", &[]),
    ("samp", &[]),
    ("s", &[]),
    ("ins", &[]),
    ("kbd", &[]),
    ("rp", &[]),
    ("rt", &[]),
    ("rtc", &[]),
    ("ruby", &[]),
    ("iframe", &["width", "height", "frameborder", "src", "allowfullscreen"]),
];

/// An element is dropped unless at least one of its required attributes
/// survives filtering.
const REQUIRED_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href"]),
    ("iframe", &["src"]),
    ("img", &["src"]),
    ("source", &["src", "srcset"]),
];

/// Disallowed tags whose content is dropped along with them.
const BLOCKED_TAGS: &[&str] = &["noscript", "script", "style"];

/// Elements that never have content or an end tag.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Attributes holding a URL that is fetched or navigated to.
const EXTERNAL_RESOURCE_ATTRIBUTES: &[&str] = &["src", "href", "poster", "cite"];

// https://www.iana.org/assignments/uri-schemes/uri-schemes.xhtml
const ALLOWED_URI_SCHEMES: &[&str] = &[
    "apt:",
    "bitcoin:",
    "callto:",
    "dav:",
    "davs:",
    "ed2k://",
    "facetime://",
    "feed:",
    "ftp://",
    "geo:",
    "gopher://",
    "git://",
    "http://",
    "https://",
    "irc://",
    "irc6://",
    "ircs://",
    "itms://",
    "itms-apps://",
    "magnet:",
    "mailto:",
    "news:",
    "nntp:",
    "rtmp://",
    "sip:",
    "sips:",
    "skype:",
    "spotify:",
    "ssh://",
    "sftp://",
    "steam://",
    "svn://",
    "svn+ssh://",
    "tel:",
    "webcal://",
    "xmpp:",
];

/// Tracking and share-button endpoints, matched as substrings.
const BLOCKED_RESOURCES: &[&str] = &[
    "feedsportal.com",
    "api.flattr.com",
    "stats.wordpress.com",
    "plus.google.com/share",
    "twitter.com/share",
    "feeds.feedburner.com",
];

/// Origins whose embeds are allowed in iframes.
const TRUSTED_IFRAME_ORIGINS: &[&str] = &[
    "http://www.youtube.com",
    "https://www.youtube.com",
    "https://www.youtube-nocookie.com",
    "http://player.vimeo.com",
    "https://player.vimeo.com",
    "http://www.dailymotion.com",
    "https://www.dailymotion.com",
    "http://vk.com",
    "https://vk.com",
    "http://soundcloud.com",
    "https://soundcloud.com",
    "http://w.soundcloud.com",
    "https://w.soundcloud.com",
    "http://bandcamp.com",
    "https://bandcamp.com",
    "https://cdn.embedly.com",
    "https://player.bilibili.com",
];

/// Inline images that may stay as `data:` URIs.
const SAFE_DATA_IMAGE_PREFIXES: &[&str] = &[
    "data:image/avif",
    "data:image/apng",
    "data:image/png",
    "data:image/svg",
    "data:image/svg+xml",
    "data:image/jpg",
    "data:image/jpeg",
    "data:image/gif",
    "data:image/webp",
];

/// Attributes appended to every emitted element of a tag, as rendered markup.
const EXTRA_ATTRIBUTES: &[(&str, &[(&str, &str)])] = &[
    (
        "a",
        &[
            ("rel", r#"rel="noopener noreferrer""#),
            ("target", r#"target="_blank""#),
            ("referrerpolicy", r#"referrerpolicy="no-referrer""#),
        ],
    ),
    ("video", &[("controls", "controls")]),
    ("audio", &[("controls", "controls")]),
    (
        "iframe",
        &[
            ("sandbox", r#"sandbox="allow-scripts allow-same-origin allow-popups""#),
            ("loading", r#"loading="lazy""#),
        ],
    ),
    ("img", &[("loading", r#"loading="lazy""#)]),
];

fn tag_allow_list() -> &'static HashMap<&'static str, &'static [&'static str]> {
    static TABLE: OnceLock<HashMap<&'static str, &'static [&'static str]>> = OnceLock::new();
    TABLE.get_or_init(|| TAG_ALLOW_LIST.iter().copied().collect())
}

fn lookup<T: Copy>(table: &[(&str, T)], tag: &str) -> Option<T> {
    table
        .iter()
        .find_map(|(name, value)| (*name == tag).then_some(*value))
}

// ============================================================================
// Policy
// ============================================================================

/// What the sanitizer lets through.
///
/// The tables are fixed; the only runtime setting is an optional host of an
/// alternate video frontend (an Invidious instance, for example) whose
/// iframes are trusted in addition to the built-in embed origins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizerPolicy {
    alternate_frontend_host: Option<String>,
}

impl SanitizerPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust iframes served from `host`. Accepts a bare host name or a URL;
    /// an empty value clears the setting.
    pub fn with_alternate_frontend_host(mut self, host: &str) -> Self {
        let host = host.trim();
        let host = match url::Url::parse(host) {
            Ok(url) if url.has_host() => url.host_str().unwrap_or_default().to_string(),
            _ => host.trim_end_matches('/').to_string(),
        };
        self.alternate_frontend_host = (!host.is_empty()).then(|| host.to_ascii_lowercase());
        self
    }

    pub fn alternate_frontend_host(&self) -> Option<&str> {
        self.alternate_frontend_host.as_deref()
    }

    pub fn is_allowed_tag(&self, tag: &str) -> bool {
        tag_allow_list().contains_key(tag)
    }

    pub fn is_allowed_attribute(&self, tag: &str, attribute: &str) -> bool {
        tag_allow_list()
            .get(tag)
            .is_some_and(|allowed| allowed.contains(&attribute))
    }

    pub fn required_attributes(&self, tag: &str) -> Option<&'static [&'static str]> {
        lookup(REQUIRED_ATTRIBUTES, tag)
    }

    /// Whether an element with the surviving `attributes` may be emitted.
    pub fn has_required_attributes<'a>(
        &self,
        tag: &str,
        mut attributes: impl Iterator<Item = &'a str>,
    ) -> bool {
        match self.required_attributes(tag) {
            Some(required) => attributes.any(|name| required.contains(&name)),
            None => true,
        }
    }

    pub fn is_blocked_tag(&self, tag: &str) -> bool {
        BLOCKED_TAGS.contains(&tag)
    }

    pub fn is_void_tag(&self, tag: &str) -> bool {
        VOID_TAGS.contains(&tag)
    }

    pub fn is_external_resource_attribute(&self, attribute: &str) -> bool {
        EXTERNAL_RESOURCE_ATTRIBUTES.contains(&attribute)
    }

    pub fn has_allowed_scheme(&self, url: &str) -> bool {
        ALLOWED_URI_SCHEMES
            .iter()
            .any(|prefix| url.starts_with(prefix))
    }

    pub fn is_blocked_resource(&self, url: &str) -> bool {
        BLOCKED_RESOURCES.iter().any(|needle| url.contains(needle))
    }

    pub fn is_trusted_iframe_origin(&self, origin: &str) -> bool {
        TRUSTED_IFRAME_ORIGINS.contains(&origin)
    }

    pub fn is_alternate_frontend(&self, host: &str) -> bool {
        self.alternate_frontend_host
            .as_deref()
            .is_some_and(|alternate| alternate.eq_ignore_ascii_case(host))
    }

    pub fn is_safe_data_image(&self, value: &str) -> bool {
        SAFE_DATA_IMAGE_PREFIXES
            .iter()
            .any(|prefix| value.starts_with(prefix))
    }

    /// `(name, rendered)` pairs appended to an emitted `tag`.
    pub fn extra_attributes(&self, tag: &str) -> &'static [(&'static str, &'static str)] {
        lookup(EXTRA_ATTRIBUTES, tag).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_lookup() {
        let policy = SanitizerPolicy::new();
        assert!(policy.is_allowed_tag("p"));
        assert!(policy.is_allowed_tag("iframe"));
        assert!(!policy.is_allowed_tag("script"));
        assert!(!policy.is_allowed_tag("div"));

        assert!(policy.is_allowed_attribute("a", "href"));
        assert!(!policy.is_allowed_attribute("a", "onclick"));
        assert!(!policy.is_allowed_attribute("p", "style"));
        assert!(!policy.is_allowed_attribute("div", "id"));
    }

    #[test]
    fn test_required_attributes() {
        let policy = SanitizerPolicy::new();
        assert!(policy.has_required_attributes("a", ["title", "href"].into_iter()));
        assert!(!policy.has_required_attributes("a", ["title"].into_iter()));
        assert!(policy.has_required_attributes("source", ["srcset"].into_iter()));
        assert!(!policy.has_required_attributes("img", std::iter::empty()));
        assert!(policy.has_required_attributes("p", std::iter::empty()));
    }

    #[test]
    fn test_scheme_whitelist() {
        let policy = SanitizerPolicy::new();
        assert!(policy.has_allowed_scheme("https://example.com/"));
        assert!(policy.has_allowed_scheme("mailto:someone@example.com"));
        assert!(policy.has_allowed_scheme("magnet:?xt=urn:btih:abc"));
        assert!(!policy.has_allowed_scheme("javascript:alert(1)"));
        assert!(!policy.has_allowed_scheme("vbscript:msgbox"));
        assert!(!policy.has_allowed_scheme("data:text/html,hi"));
    }

    #[test]
    fn test_blocked_resources() {
        let policy = SanitizerPolicy::new();
        assert!(policy.is_blocked_resource("https://stats.wordpress.com/b.gif"));
        assert!(policy.is_blocked_resource("https://twitter.com/share?url=x"));
        assert!(!policy.is_blocked_resource("https://twitter.com/someone"));
    }

    #[test]
    fn test_data_images() {
        let policy = SanitizerPolicy::new();
        assert!(policy.is_safe_data_image("data:image/png;base64,iVBORw0KGgo="));
        assert!(policy.is_safe_data_image("data:image/webp;base64,UklGR"));
        assert!(!policy.is_safe_data_image("data:text/html;base64,PHNjcmlwdD4="));
    }

    #[test]
    fn test_alternate_frontend_host_normalization() {
        let policy = SanitizerPolicy::new().with_alternate_frontend_host("https://Yewtu.be/");
        assert_eq!(policy.alternate_frontend_host(), Some("yewtu.be"));
        assert!(policy.is_alternate_frontend("yewtu.be"));

        let policy = SanitizerPolicy::new().with_alternate_frontend_host("invidious.example.org");
        assert_eq!(policy.alternate_frontend_host(), Some("invidious.example.org"));

        let policy = policy.with_alternate_frontend_host("  ");
        assert_eq!(policy.alternate_frontend_host(), None);
        assert!(!policy.is_alternate_frontend(""));
    }

    #[test]
    fn test_extra_attributes() {
        let policy = SanitizerPolicy::new();
        let names: Vec<&str> = policy.extra_attributes("a").iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["rel", "target", "referrerpolicy"]);
        assert!(policy.extra_attributes("p").is_empty());
    }
}
