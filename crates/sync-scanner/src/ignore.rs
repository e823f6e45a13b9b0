//! Ignore pattern handling.
//!
//! Ignore files hold one shell-style glob per line, matched against entry
//! basenames only. A pattern's scope is the directory holding the ignore
//! file and everything below it; the repository root scopes as `"."`.

use std::collections::HashMap;
use std::path::MAIN_SEPARATOR;

/// Patterns collected during the ignore pass, keyed by scope directory
/// (repository-relative).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IgnorePatterns {
    scopes: HashMap<String, Vec<String>>,
}

impl IgnorePatterns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the patterns of the ignore file found in `scope`.
    pub fn insert(&mut self, scope: impl Into<String>, patterns: Vec<String>) {
        self.scopes.insert(scope.into(), patterns);
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn patterns(&self, scope: &str) -> Option<&[String]> {
        self.scopes.get(scope).map(|p| p.as_slice())
    }

    /// Whether the repository-relative `name` is ignored: some scope is an
    /// ancestor of (or equal to) its parent directory and one of that
    /// scope's patterns matches its basename.
    pub fn matches(&self, name: &str) -> bool {
        let (parent, base) = match name.rfind(MAIN_SEPARATOR) {
            Some(i) => (&name[..i], &name[i + 1..]),
            None => ("", base_of(name)),
        };

        for (scope, patterns) in &self.scopes {
            let in_scope = scope == "."
                || parent == scope.as_str()
                || parent.starts_with(&format!("{}{}", scope, MAIN_SEPARATOR));
            if !in_scope {
                continue;
            }
            if patterns.iter().any(|p| glob_match(p, base)) {
                return true;
            }
        }
        false
    }
}

fn base_of(name: &str) -> &str {
    name.rsplit(MAIN_SEPARATOR).next().unwrap_or(name)
}

/// Shell-style glob match over a basename: `*`, `?` and `[...]` classes
/// (with `!` or `^` negation and `a-z` ranges). No separators are involved,
/// so `*` may match anything.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    match_here(&p, &n)
}

fn match_here(p: &[char], n: &[char]) -> bool {
    match p.first() {
        None => n.is_empty(),
        Some('*') => {
            // Try every possible length for the star, longest first not
            // required; shortest-first keeps recursion shallow.
            (0..=n.len()).any(|skip| match_here(&p[1..], &n[skip..]))
        }
        Some('?') => !n.is_empty() && match_here(&p[1..], &n[1..]),
        Some('[') => {
            let Some(end) = class_end(p) else {
                // Unterminated class never matches, same as a bad pattern.
                return false;
            };
            let Some(&c) = n.first() else { return false };
            class_matches(&p[1..end], c) && match_here(&p[end + 1..], &n[1..])
        }
        Some(&lit) => n.first() == Some(&lit) && match_here(&p[1..], &n[1..]),
    }
}

fn class_end(p: &[char]) -> Option<usize> {
    // p[0] is '['. A ']' directly after '[' (or after negation) is literal.
    let mut i = 1;
    if matches!(p.get(i), Some('!') | Some('^')) {
        i += 1;
    }
    if p.get(i) == Some(&']') {
        i += 1;
    }
    while i < p.len() {
        if p[i] == ']' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn class_matches(class: &[char], c: char) -> bool {
    let (negated, class) = match class.first() {
        Some('!') | Some('^') => (true, &class[1..]),
        _ => (false, class),
    };

    let mut found = false;
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                found = true;
            }
            i += 3;
        } else {
            if class[i] == c {
                found = true;
            }
            i += 1;
        }
    }
    found != negated
}
