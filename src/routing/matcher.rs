//! Path pattern matching.
//!
//! # Responsibilities
//! - Normalize request paths (duplicate slashes, `.` and `..` segments)
//! - Match paths against patterns with `?`, `*` and `**` wildcards
//! - Derive the literal prefix a proxy route strips
//!
//! # Design Decisions
//! - `*` and `?` never cross a `/`; `**` spans zero or more whole segments
//! - Matching is case-sensitive
//! - No regex; segment matching with bounded backtracking

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `**`: zero or more segments.
    AnyDepth,
    /// One segment, possibly containing `*` and `?`.
    Glob(Vec<char>),
}

/// Compiled path pattern such as `/api/**` or `/assets/*.js`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Self {
        let segments = split(pattern)
            .map(|s| {
                if s == "**" {
                    Segment::AnyDepth
                } else {
                    Segment::Glob(s.chars().collect())
                }
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Ordering key: longer patterns are more specific.
    pub fn specificity(&self) -> usize {
        self.raw.len()
    }

    /// Match a request path. The path is normalized first; a path that
    /// escapes the root never matches.
    pub fn matches(&self, path: &str) -> bool {
        let Some(normalized) = normalize_path(path) else {
            return false;
        };
        let parts: Vec<&str> = split(&normalized).collect();
        match_segments(&self.segments, &parts)
    }

    /// Literal text before the first wildcard, trailing slashes trimmed.
    pub fn literal_prefix(&self) -> &str {
        let end = self.raw.find(['*', '?']).unwrap_or(self.raw.len());
        self.raw[..end].trim_end_matches('/')
    }

    /// Remove [`literal_prefix`](Self::literal_prefix) from `path`.
    /// The result always starts with `/`.
    pub fn strip(&self, path: &str) -> String {
        let prefix = self.literal_prefix();
        let rest = match path.strip_prefix(prefix) {
            Some(rest) if prefix.is_empty() || rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        };
        if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{}", rest)
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Collapse duplicate slashes and resolve `.`/`..`.
///
/// Returns `None` if `..` would climb above the root.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut out: Vec<&str> = Vec::new();
    for segment in split(path) {
        match segment {
            "." => {}
            ".." => {
                out.pop()?;
            }
            s => out.push(s),
        }
    }
    Some(format!("/{}", out.join("/")))
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyDepth, rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((Segment::Glob(glob), rest)) => match path.split_first() {
            Some((head, tail)) => glob_match(glob, head) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Single-segment glob with `*` and `?`.
fn glob_match(pattern: &[char], text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path("/a//b/./c/").as_deref(), Some("/a/b/c"));
        assert_eq!(normalize_path("/a/b/../c").as_deref(), Some("/a/c"));
        assert_eq!(normalize_path("").as_deref(), Some("/"));
        assert_eq!(normalize_path("/../etc/passwd"), None);
    }

    #[test]
    fn test_wildcards() {
        let deep = PathPattern::new("/api/**");
        assert!(deep.matches("/api"));
        assert!(deep.matches("/api/users/42"));
        assert!(!deep.matches("/apix/users"));

        let single = PathPattern::new("/api/*");
        assert!(single.matches("/api/users"));
        assert!(!single.matches("/api/users/42"));

        let ext = PathPattern::new("/assets/*.js");
        assert!(ext.matches("/assets/app.js"));
        assert!(!ext.matches("/assets/app.css"));

        let middle = PathPattern::new("/a/**/z");
        assert!(middle.matches("/a/z"));
        assert!(middle.matches("/a/b/c/z"));
        assert!(!middle.matches("/a/b/c"));

        assert!(PathPattern::new("/v?/x").matches("/v1/x"));
        assert!(PathPattern::new("/exact").matches("//exact/"));
        assert!(!PathPattern::new("/exact").matches("/Exact"));
    }

    #[test]
    fn test_strip_prefix() {
        let p = PathPattern::new("/api/**");
        assert_eq!(p.literal_prefix(), "/api");
        assert_eq!(p.strip("/api/users?x"), "/users?x");
        assert_eq!(p.strip("/api"), "/");

        let root = PathPattern::new("/**");
        assert_eq!(root.literal_prefix(), "");
        assert_eq!(root.strip("/x/y"), "/x/y");

        // Prefix must end on a segment boundary.
        assert_eq!(PathPattern::new("/api*").strip("/apiv2/x"), "/apiv2/x");
    }
}
