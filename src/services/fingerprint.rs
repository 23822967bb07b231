//! Request identity: canonicalization and fingerprinting.
//!
//! Two submissions a human would consider "the same request" must produce the
//! same fingerprint. For video references that means collapsing platform URL
//! variants and dropping tracking query parameters before hashing; free text
//! is used verbatim (trimmed). The pipeline version is part of the digest so
//! an algorithm change partitions the cache without explicit invalidation.

use sha2::{Digest, Sha256};
use url::Url;

use crate::models::job::ContentType;
use crate::models::verdict::PIPELINE_VERSION;

/// Query parameters that carry attribution, not identity.
const TRACKING_PARAMS: &[&str] = &[
    "si", "feature", "fbclid", "gclid", "yclid", "igsh", "ref", "ref_src", "mc_cid", "mc_eid",
    "share_id",
];

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

fn is_youtube_host(host: &str) -> bool {
    matches!(
        host,
        "youtube.com" | "www.youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be"
    )
}

/// Rewrite short-link and alias forms of a video URL to one canonical shape.
/// Returns `None` for anything that does not parse as an http(s) URL, in
/// which case the caller falls back to the trimmed raw string.
fn canonicalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_lowercase();

    // Collapse YouTube aliases to the canonical watch path.
    let (host, path, video_id) = if host == "youtu.be" {
        let id = parsed.path().trim_matches('/').to_string();
        ("www.youtube.com".to_string(), "/watch".to_string(), Some(id))
    } else if is_youtube_host(&host) {
        let segments: Vec<&str> = parsed.path().trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["shorts", id] | ["embed", id] | ["live", id] => (
                "www.youtube.com".to_string(),
                "/watch".to_string(),
                Some((*id).to_string()),
            ),
            _ => ("www.youtube.com".to_string(), parsed.path().to_string(), None),
        }
    } else {
        (host, parsed.path().to_string(), None)
    };

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if let Some(id) = video_id {
        params.retain(|(k, _)| k != "v");
        params.push(("v".to_string(), id));
    }
    params.sort();

    let scheme = if is_youtube_host(&host) || host == "www.youtube.com" {
        "https"
    } else {
        parsed.scheme()
    };

    let path = if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path
    };

    // `Url::port` is None for the scheme default, so the default port and the
    // portless form collapse while an explicit non-default port stays distinct.
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.clone(),
    };

    let mut canonical = Url::parse(&format!("{scheme}://{authority}{path}")).ok()?;
    if !params.is_empty() {
        canonical
            .query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    canonical.set_fragment(None);
    Some(canonical.to_string())
}

/// Normalize content into its identity form. Idempotent.
pub fn canonicalize(content_type: ContentType, raw: &str) -> String {
    let trimmed = raw.trim();
    match content_type {
        ContentType::Text => trimmed.to_string(),
        ContentType::Video => {
            canonicalize_url(trimmed).unwrap_or_else(|| trimmed.to_string())
        }
    }
}

/// Stable 64-char hex identity key for a submission, versioned by the
/// current pipeline.
pub fn fingerprint(content_type: ContentType, raw: &str) -> String {
    let canonical = canonicalize(content_type, raw);
    let mut hasher = Sha256::new();
    hasher.update(PIPELINE_VERSION.as_bytes());
    hasher.update(b"\n");
    hasher.update(content_type.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_trimmed_verbatim() {
        assert_eq!(
            canonicalize(ContentType::Text, "  Earth is round.  "),
            "Earth is round."
        );
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let inputs = [
            (ContentType::Text, "  The moon landing happened in 1969 "),
            (
                ContentType::Video,
                "https://youtu.be/dQw4w9WgXcQ?si=AbCd&t=42",
            ),
            (
                ContentType::Video,
                "https://www.youtube.com/shorts/xyz123?feature=share",
            ),
            (ContentType::Video, "not a url at all"),
        ];
        for (ct, raw) in inputs {
            let once = canonicalize(ct, raw);
            let twice = canonicalize(ct, &once);
            assert_eq!(once, twice, "canonicalize not idempotent for {raw:?}");
        }
    }

    #[test]
    fn tracking_params_do_not_change_identity() {
        let a = fingerprint(
            ContentType::Video,
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        );
        let b = fingerprint(
            ContentType::Video,
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&utm_source=tg&utm_medium=share&si=xxx",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn short_link_collapses_to_watch_url() {
        let short = canonicalize(ContentType::Video, "https://youtu.be/dQw4w9WgXcQ");
        let long = canonicalize(
            ContentType::Video,
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        );
        assert_eq!(short, long);

        let shorts = canonicalize(
            ContentType::Video,
            "https://m.youtube.com/shorts/dQw4w9WgXcQ",
        );
        assert_eq!(shorts, long);
    }

    #[test]
    fn meaningful_params_survive() {
        let canonical = canonicalize(
            ContentType::Video,
            "https://example.com/video?id=5&utm_campaign=x",
        );
        assert!(canonical.contains("id=5"));
        assert!(!canonical.contains("utm_campaign"));
    }

    #[test]
    fn explicit_port_is_part_of_identity() {
        let default_port = fingerprint(ContentType::Video, "https://example.com/v");
        let custom_port = fingerprint(ContentType::Video, "https://example.com:8443/v");
        assert_ne!(default_port, custom_port);

        // The scheme default collapses with the portless form.
        let spelled_out = fingerprint(ContentType::Video, "https://example.com:443/v");
        assert_eq!(default_port, spelled_out);

        let canonical = canonicalize(ContentType::Video, "https://example.com:8443/v?si=x");
        assert!(canonical.contains(":8443"));
        assert_eq!(canonical, canonicalize(ContentType::Video, &canonical));
    }

    #[test]
    fn content_types_partition_the_space() {
        let same = "https://www.youtube.com/watch?v=abc";
        assert_ne!(
            fingerprint(ContentType::Text, same),
            fingerprint(ContentType::Video, same)
        );
    }

    #[test]
    fn digest_shape() {
        let fp = fingerprint(ContentType::Text, "hello");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
