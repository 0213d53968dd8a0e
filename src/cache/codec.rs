//! Lossless mapping between a remote URL and a mirror's directory name.
//!
//! `-` doubles to `--` so that the single `-` is free to stand in for `/`.
//! Decoding turns every `-` flanked by word characters back into `/` before
//! collapsing `--`, so `a-b-c` comes back as `a/b/c` while `a--b` comes
//! back as `a-b`.

use std::sync::OnceLock;

use color_eyre::eyre::{Context as _, Result};
use regex::Regex;
use url::Url;

/// Encode a remote URL into its cache-directory basename.
pub fn url_to_basename(url: &str) -> Result<String> {
    let parsed = Url::parse(url).wrap_err_with(|| format!("invalid repository url: {url}"))?;
    let mut netloc = parsed.host_str().unwrap_or_default().to_string();
    if let Some(port) = parsed.port() {
        netloc = format!("{netloc}:{port}");
    }
    let mut norm = format!("{netloc}{}", parsed.path());
    if let Some(stripped) = norm.strip_suffix(".git") {
        norm = stripped.to_string();
    }
    Ok(norm.replace('-', "--").replace('/', "-").to_lowercase())
}

/// Decode a cache-directory basename back into its https URL.
pub fn basename_to_url(basename: &str) -> String {
    static SINGLE_DASH: OnceLock<Regex> = OnceLock::new();
    let single_dash = SINGLE_DASH.get_or_init(|| Regex::new(r"\b-\b").expect("static regex"));
    let netpath = single_dash.replace_all(basename, "/").replace("--", "-");
    format!("https://{netpath}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_chromium_src() {
        assert_eq!(
            url_to_basename("https://chromium.googlesource.com/chromium/src.git").unwrap(),
            "chromium.googlesource.com-chromium-src"
        );
    }

    #[test]
    fn hyphens_survive_a_round_trip() {
        let basename = url_to_basename("https://example.com/a-b/c.git").unwrap();
        assert_eq!(basename, "example.com-a--b-c");
        assert_eq!(basename_to_url(&basename), "https://example.com/a-b/c");
    }

    #[test]
    fn round_trips_plain_urls() {
        for url in [
            "https://chromium.googlesource.com/chromium/src",
            "https://example.com/a-b/c",
            "https://host.example/x/y/z",
            "https://gitlab.freedesktop.org/mesa/mesa",
        ] {
            let basename = url_to_basename(url).unwrap();
            assert_eq!(basename_to_url(&basename), url, "via {basename}");
        }
    }

    #[test]
    fn lowercases_and_drops_git_suffix() {
        assert_eq!(
            url_to_basename("https://Example.COM/Foo/Bar.git").unwrap(),
            "example.com-foo-bar"
        );
    }

    #[test]
    fn keeps_explicit_ports() {
        assert_eq!(
            url_to_basename("https://example.com:8443/repo").unwrap(),
            "example.com:8443-repo"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(url_to_basename("not a url").is_err());
    }
}
