//! Resolution of URIs found inside a manifest against the manifest's own location.

use url::Url;

/// Rewrites relative manifest entries into absolute URLs.
///
/// The base is the manifest URL with its final path segment removed, so every
/// entry resolves against the manifest's directory regardless of which other
/// entries came before it. The manifest's query string is not carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriRewriter {
    scheme: String,
    origin: String,
    directory: String,
}

impl UriRewriter {
    pub fn new(manifest_url: &Url) -> Self {
        let path = manifest_url.path();
        let directory = match path.rfind('/') {
            Some(pos) => &path[..=pos],
            None => "/",
        };

        Self {
            scheme: manifest_url.scheme().to_string(),
            origin: manifest_url.origin().ascii_serialization(),
            directory: directory.to_string(),
        }
    }

    /// The directory every relative entry is appended to, e.g. `https://host/a/b/`.
    pub fn base(&self) -> String {
        format!("{}{}", self.origin, self.directory)
    }

    pub fn rewrite(&self, candidate: &str) -> String {
        let candidate = candidate.trim();
        if is_absolute_http(candidate) {
            return candidate.to_string();
        }
        if candidate.starts_with("//") {
            return format!("{}:{candidate}", self.scheme);
        }
        if candidate.starts_with('/') {
            return format!("{}{candidate}", self.origin);
        }
        format!("{}{}{candidate}", self.origin, self.directory)
    }
}

pub fn is_absolute_http(uri: &str) -> bool {
    let prefix = |p: &str| uri.get(..p.len()).is_some_and(|s| s.eq_ignore_ascii_case(p));
    prefix("http://") || prefix("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter(url: &str) -> UriRewriter {
        UriRewriter::new(&Url::parse(url).unwrap())
    }

    #[test]
    fn relative_entry_resolves_against_manifest_directory() {
        let r = rewriter("https://cdn.example.com/vod/show/index.m3u8?token=abc");
        assert_eq!(r.base(), "https://cdn.example.com/vod/show/");
        assert_eq!(
            r.rewrite("seg-0001.ts"),
            "https://cdn.example.com/vod/show/seg-0001.ts"
        );
        assert_eq!(
            r.rewrite("720p/index.m3u8"),
            "https://cdn.example.com/vod/show/720p/index.m3u8"
        );
    }

    #[test]
    fn non_default_port_is_kept() {
        let r = rewriter("http://127.0.0.1:8080/live/master.m3u8");
        assert_eq!(r.rewrite("a.ts"), "http://127.0.0.1:8080/live/a.ts");
    }

    #[test]
    fn manifest_at_root() {
        let r = rewriter("https://example.com/master.m3u8");
        assert_eq!(r.rewrite("low.m3u8"), "https://example.com/low.m3u8");
    }

    #[test]
    fn absolute_entries_are_unchanged() {
        let r = rewriter("https://example.com/a/master.m3u8");
        for uri in [
            "https://other.example.com/x.ts",
            "http://other.example.com/x.ts?sig=1",
            "HTTPS://upper.example.com/x.ts",
        ] {
            assert_eq!(r.rewrite(uri), uri);
        }
    }

    #[test]
    fn rewrite_is_idempotent() {
        let r = rewriter("https://example.com/a/b/master.m3u8");
        for uri in ["x.ts", "/root.ts", "//cdn.example.com/y.ts", "https://z.com/z.ts"] {
            let once = r.rewrite(uri);
            assert_eq!(r.rewrite(&once), once);
        }
    }

    #[test]
    fn root_and_scheme_relative_entries() {
        let r = rewriter("https://example.com/a/b/master.m3u8");
        assert_eq!(r.rewrite("/media/x.ts"), "https://example.com/media/x.ts");
        assert_eq!(
            r.rewrite("//cdn.example.com/x.ts"),
            "https://cdn.example.com/x.ts"
        );
    }
}
