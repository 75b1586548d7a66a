//! URL capability.
//!
//! The engine treats paths inside generated artifacts (source-map URLs,
//! references between outputs) as URLs: forward slashes, with query and
//! fragment suffixes preserved across resolution.

use base64::Engine as _;

/// Split a URL into its path part and its query/fragment suffix.
fn split_suffix(url: &str) -> (&str, &str) {
    match url.find(['?', '#']) {
        Some(i) => url.split_at(i),
        None => (url, ""),
    }
}

fn has_scheme(url: &str) -> bool {
    url.contains("://") || url.starts_with("data:")
}

/// Normalize `.` and `..` segments of a slash-separated path.
fn normalize_segments(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(out.last(), Some(&s) if s != "..") {
                    out.pop();
                } else if !absolute {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    let joined = out.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Resolve `url` against `base`, keeping `url`'s query and fragment.
///
/// Scheme-qualified and root-relative URLs pass through unchanged (apart
/// from normalization of root-relative paths).
pub fn resolve_url(base: &str, url: &str) -> String {
    if has_scheme(url) {
        return url.to_string();
    }
    let (path, suffix) = split_suffix(url);
    if path.starts_with('/') {
        return format!("{}{}", normalize_segments(path), suffix);
    }
    let (base_path, _) = split_suffix(base);
    let base_dir = match base_path.rfind('/') {
        Some(i) => &base_path[..=i],
        None => "",
    };
    format!("{}{}", normalize_segments(&format!("{}{}", base_dir, path)), suffix)
}

/// Compute a relative URL from `from` to `to`, keeping `to`'s suffix.
pub fn relative_url(from: &str, to: &str) -> String {
    if has_scheme(to) {
        return to.to_string();
    }
    let (from_path, _) = split_suffix(from);
    let (to_path, suffix) = split_suffix(to);
    let from_dir = match from_path.rfind('/') {
        Some(i) => &from_path[..=i],
        None => "",
    };
    let from_segs: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let to_segs: Vec<&str> = to_path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();

    let mut common = 0;
    while common < from_segs.len() && common < to_segs.len() && from_segs[common] == to_segs[common] {
        common += 1;
    }

    let mut out: Vec<String> = Vec::new();
    for _ in common..from_segs.len() {
        out.push("..".to_string());
    }
    for seg in &to_segs[common..] {
        out.push((*seg).to_string());
    }
    if out.is_empty() {
        out.push(".".to_string());
    }
    format!("{}{}", out.join("/"), suffix)
}

/// Render a `data:` URI with a base64 payload.
pub fn base64_uri(mime: &str, payload: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("a/b.js", "c.js"), "a/c.js");
        assert_eq!(resolve_url("a/b.js", "../c.js"), "c.js");
        assert_eq!(resolve_url("a/b.js", "c.js?v=1"), "a/c.js?v=1");
        assert_eq!(resolve_url("a/b.js", "/root.js"), "/root.js");
        assert_eq!(resolve_url("a/b.js", "https://x/y.js"), "https://x/y.js");
    }

    #[test]
    fn test_relative_url() {
        assert_eq!(relative_url("out/a.js", "out/a.js.map"), "a.js.map");
        assert_eq!(relative_url("out/sub/a.js", "out/b.js"), "../b.js");
        assert_eq!(relative_url("a.js", "b.js#frag"), "b.js#frag");
    }

    #[test]
    fn test_base64_uri() {
        assert_eq!(
            base64_uri("application/json", b"{}"),
            "data:application/json;base64,e30="
        );
    }
}
