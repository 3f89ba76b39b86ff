//! Glob compilation with capture-group substitution.
//!
//! Input globs are `/`-separated patterns over commit paths. Every wildcard
//! compiles to a regex capture group, which is what lets a matched path be
//! folded back into a user-supplied template (`"$1"`, `"$2/$1"`, ...) to
//! derive a stable grouping key for the file.
//!
//! Supported syntax:
//!
//! | Glob  | Matches                               |
//! |-------|---------------------------------------|
//! | `*`   | any run of non-separator characters   |
//! | `**`  | any run of characters, separators too |
//! | `?`   | one non-separator character           |
//! | `[..]`| one character from the class          |

use regex::Regex;
use thiserror::Error;

/// Errors from glob compilation.
#[derive(Debug, Error)]
pub enum GlobError {
    /// A `[` was never closed
    #[error("unclosed character class in glob {pattern:?}")]
    UnclosedClass {
        /// The offending pattern
        pattern: String,
    },

    /// The translated pattern was rejected by the regex engine
    #[error("invalid glob {pattern}: {source}")]
    Invalid {
        /// The offending pattern
        pattern: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },
}

/// A glob compiled to an anchored regex with one capture group per wildcard.
#[derive(Debug, Clone)]
pub struct CompiledGlob {
    pattern: String,
    regex: Regex,
}

impl CompiledGlob {
    /// Compiles a glob pattern.
    pub fn compile(pattern: &str) -> Result<Self, GlobError> {
        let mut re = String::with_capacity(pattern.len() * 2 + 2);
        re.push('^');
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        re.push_str("(.*)");
                    } else {
                        re.push_str("([^/]*)");
                    }
                }
                '?' => re.push_str("([^/])"),
                '[' => {
                    re.push_str("([");
                    if chars.peek() == Some(&'!') {
                        chars.next();
                        re.push('^');
                    }
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            ']' => {
                                closed = true;
                                break;
                            }
                            '\\' => re.push_str("\\\\"),
                            c => re.push(c),
                        }
                    }
                    if !closed {
                        return Err(GlobError::UnclosedClass {
                            pattern: pattern.to_string(),
                        });
                    }
                    re.push_str("])");
                }
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');
        let regex = Regex::new(&re).map_err(|source| GlobError::Invalid {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The original glob pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true if `path` matches the whole glob.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Substitutes the capture groups of a match against `path` into
    /// `template` (`$1` is the first wildcard, `$2` the second, ...).
    ///
    /// A non-matching path is returned unchanged. For a fixed glob, template
    /// and path the result is deterministic.
    pub fn replace(&self, path: &str, template: &str) -> String {
        self.regex.replace(path, template).into_owned()
    }
}
