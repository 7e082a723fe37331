use std::net::IpAddr;

use url::Url;

/// Second-level labels that sit under a two-letter country code as part of
/// the public suffix (`example.co.uk`, `example.com.au`).
const COUNTRY_SECOND_LEVEL: &[&str] = &["ac", "co", "com", "edu", "gov", "net", "org"];

const YOUTUBE_EMBED: &str = "//www.youtube.com/embed/";
const YOUTUBE_NOCOOKIE_EMBED: &str = "https://www.youtube-nocookie.com/embed/";

/// Resolve `input` against `base_url`.
///
/// Absolute inputs are returned normalized. Protocol-relative inputs default
/// to https when the base cannot supply a scheme. Relative inputs without a
/// usable base yield `None`.
pub(crate) fn absolute_url(base_url: &str, input: &str) -> Option<String> {
    match Url::parse(input) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            if let Ok(base) = Url::parse(base_url) {
                if let Ok(url) = base.join(input) {
                    return Some(url.to_string());
                }
            }
            let trimmed = input.trim();
            if trimmed.starts_with("//") {
                return Url::parse(&format!("https:{}", trimmed))
                    .ok()
                    .map(|url| url.to_string());
            }
            None
        }
        Err(_) => None,
    }
}

/// Approximate registrable domain of a host: the last two labels, or three
/// when the second-to-last is a common second-level label under a country
/// code. IP addresses are returned as they are.
pub(crate) fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    let n = labels.len();
    if n <= 2 {
        return host;
    }

    let tld = labels[n - 1];
    let second = labels[n - 2];
    let keep = if tld.len() == 2 && COUNTRY_SECOND_LEVEL.contains(&second) {
        3
    } else {
        2
    };
    labels[n - keep..].join(".")
}

/// Whether `host` belongs to the same site as the page at `base_url`.
pub(crate) fn same_site(base_url: &str, host: &str) -> bool {
    let Ok(base) = Url::parse(base_url) else {
        return false;
    };
    match base.host_str() {
        Some(base_host) => registrable_domain(base_host) == registrable_domain(host),
        None => false,
    }
}

/// Point YouTube embeds at the no-cookie domain.
pub(crate) fn rewrite_embed_url(url: &str) -> String {
    match url.find(YOUTUBE_EMBED) {
        Some(index) => format!(
            "{}{}",
            YOUTUBE_NOCOOKIE_EMBED,
            &url[index + YOUTUBE_EMBED.len()..]
        ),
        None => url.to_string(),
    }
}

/// Append `input` with `& < > " '` escaped, for text and quoted attribute
/// values.
pub(crate) fn push_escaped(out: &mut String, input: &str) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
