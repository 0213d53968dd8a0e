/// A canonicalized `remote.origin.fetch` entry, paired with the regex that
/// scopes `git config --replace-all` to the entries it supersedes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchSpec {
    /// The `+<src>:<dst>` line as written into the mirror config
    pub line: String,
    /// `\+<src>:.*` with glob characters escaped
    pub value_regex: String,
}

impl FetchSpec {
    /// Parse and canonicalize a user-supplied ref spec.
    ///
    /// Short names expand to `refs/heads/<name>`; a missing destination
    /// defaults to the (expanded) source.
    pub fn parse(spec: &str) -> Self {
        let (src, dst) = match spec.split_once(':') {
            Some((src, dst)) => (src, Some(dst)),
            None => (spec, None),
        };
        let src = src.trim_start_matches('+').trim_end_matches('/');
        let src = if src.starts_with("refs/") {
            src.to_string()
        } else {
            format!("refs/heads/{src}")
        };
        let dst = dst.map_or_else(|| src.clone(), |dst| dst.trim_end_matches('/').to_string());

        FetchSpec {
            value_regex: format!(r"\+{}:.*", src.replace('*', r"\*")),
            line: format!("+{src}:{dst}"),
        }
    }
}
