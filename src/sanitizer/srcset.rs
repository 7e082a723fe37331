//! `srcset` attribute parsing and rewriting.

use super::policy::SanitizerPolicy;
use super::url::absolute_url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageCandidate {
    pub url: String,
    pub descriptor: Option<String>,
}

/// Split a `srcset` value into candidates.
///
/// A candidate URL runs up to the next whitespace, minus trailing commas;
/// its descriptor runs up to the next comma.
pub(crate) fn parse_srcset(value: &str) -> Vec<ImageCandidate> {
    let mut candidates = Vec::new();
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let raw_url = &rest[..url_end];
        rest = &rest[url_end..];

        let url = raw_url.trim_end_matches(',');
        let descriptor = if url.len() != raw_url.len() {
            // "a.png," ends the candidate without a descriptor.
            None
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let descriptor = rest[..end].trim();
            rest = &rest[end..];
            (!descriptor.is_empty()).then(|| descriptor.to_string())
        };

        if !url.is_empty() {
            candidates.push(ImageCandidate {
                url: url.to_string(),
                descriptor,
            });
        }
    }

    candidates
}

/// A width (`480w`, positive integer) or pixel density (`1.5x`, positive
/// number) descriptor.
pub(crate) fn is_valid_descriptor(descriptor: &str) -> bool {
    if let Some(width) = descriptor.strip_suffix('w') {
        return !width.is_empty()
            && width.bytes().all(|b| b.is_ascii_digit())
            && width.parse::<u64>().is_ok_and(|w| w > 0);
    }

    if let Some(density) = descriptor.strip_suffix('x') {
        return !density.is_empty()
            && density.bytes().all(|b| b.is_ascii_digit() || b == b'.')
            && density
                .parse::<f64>()
                .is_ok_and(|d| d.is_finite() && d > 0.0);
    }

    false
}

pub(crate) fn serialize_srcset(candidates: &[ImageCandidate]) -> String {
    candidates
        .iter()
        .map(|candidate| match &candidate.descriptor {
            Some(descriptor) => format!("{} {}", candidate.url, descriptor),
            None => candidate.url.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rewrite every candidate URL to an absolute, allowed URL and keep only
/// valid descriptors. Returns `None` when no candidate survives.
pub(crate) fn sanitize_srcset(
    policy: &SanitizerPolicy,
    base_url: &str,
    value: &str,
) -> Option<String> {
    let candidates: Vec<ImageCandidate> = parse_srcset(value)
        .into_iter()
        .filter_map(|candidate| {
            let url = if policy.is_safe_data_image(&candidate.url) {
                candidate.url
            } else {
                let url = absolute_url(base_url, &candidate.url)?;
                if !policy.has_allowed_scheme(&url) || policy.is_blocked_resource(&url) {
                    return None;
                }
                url
            };

            let descriptor = candidate
                .descriptor
                .filter(|descriptor| is_valid_descriptor(descriptor));

            Some(ImageCandidate { url, descriptor })
        })
        .collect();

    if candidates.is_empty() {
        None
    } else {
        Some(serialize_srcset(&candidates))
    }
}
