use std::path::{Path, PathBuf};
use regex::Regex;
use tracing::warn;

use crate::error::LoadError;

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Translate a shell-style file name pattern (`*`, `?`, `[...]`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, LoadError> {
    let mut expr = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '[' => {
                expr.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    expr.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' {
                        expr.push('\\');
                    }
                    expr.push(inner);
                }
                if !closed {
                    return Err(LoadError::BadPattern {
                        pattern: pattern.to_string(),
                        reason: "unterminated character class".to_string(),
                    });
                }
                expr.push(']');
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| LoadError::BadPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>, LoadError> {
    let path = Path::new(pattern);
    let file_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return Ok(Vec::new()),
    };

    if !has_wildcard(file_name) {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        warn!(pattern = pattern, "flux file does not exist");
        return Ok(Vec::new());
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let matcher = glob_to_regex(file_name)?;

    let read_dir = match std::fs::read_dir(&dir) {
        Ok(read_dir) => read_dir,
        Err(e) => {
            warn!(pattern = pattern, dir = %dir.display(), error = %e, "cannot list directory for flux file pattern");
            return Ok(Vec::new());
        }
    };

    let mut matches = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = dir_entry?;
        let candidate = dir_entry.path();
        let matched = candidate
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| matcher.is_match(n))
            .unwrap_or(false);
        if matched && candidate.is_file() {
            matches.push(candidate);
        }
    }
    matches.sort();

    if matches.is_empty() {
        warn!(pattern = pattern, "flux file pattern matched nothing");
    }
    Ok(matches)
}

/// Expand every pattern, in order, dropping duplicates.
///
/// Only the file name part may carry wildcards. Patterns that match nothing are
/// logged and skipped, an empty result is left for the caller to judge.
pub fn resolve_file_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>, LoadError> {
    let mut resolved: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        for path in expand_pattern(pattern.as_ref())? {
            if !resolved.contains(&path) {
                resolved.push(path);
            }
        }
    }
    Ok(resolved)
}
