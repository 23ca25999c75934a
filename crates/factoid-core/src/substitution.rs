//! Pattern substitution for in-place edits
//!
//! Patterns are regular expressions with two flags: `g` replaces every match
//! instead of the first one, `i` matches case-insensitively.
//!
//! The replacement is plain text apart from these references:
//!
//! | Reference | Expands to |
//! |---|---|
//! | `$$` | a literal `$` |
//! | `$&` | the whole match |
//! | `$1` .. `$99` | a numbered group, if the pattern has it |
//! | `$<name>`, `${name}` | a named group, if the pattern has it |
//!
//! Anything else after a `$` (`$5` with no fifth group, `$money`) is kept as
//! typed.

use regex::{Captures, Regex, RegexBuilder};

use crate::error::{Result, StoreError};

/// A compiled substitution pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    global: bool,
}

impl Pattern {
    /// Compile `source` with a flag string such as `"gi"`.
    pub fn new(source: &str, flags: &str) -> Result<Self> {
        let mut global = false;
        let mut case_insensitive = false;
        for flag in flags.chars() {
            match flag {
                'g' => global = true,
                'i' => case_insensitive = true,
                other => {
                    return Err(StoreError::InvalidPattern(format!("unknown flag '{}'", other)))
                }
            }
        }

        let regex = RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| StoreError::InvalidPattern(e.to_string()))?;

        Ok(Self { regex, global })
    }

    /// Parse a slash-delimited literal like `/hel+o/gi`.
    ///
    /// Text that does not start with `/` is taken as a bare source with no
    /// flags. The last `/` closes the source, so `/a/b/g` matches `a/b`.
    pub fn parse(literal: &str) -> Result<Self> {
        let Some(body) = literal.strip_prefix('/') else {
            return Self::new(literal, "");
        };
        match body.rfind('/') {
            Some(end) => Self::new(&body[..end], &body[end + 1..]),
            None => Err(StoreError::InvalidPattern(format!(
                "unterminated pattern '{}'",
                literal
            ))),
        }
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Substitute `replacement` into `text`, expanding group references.
    pub fn apply(&self, text: &str, replacement: &str) -> String {
        let expand = |caps: &Captures<'_>| self.expand(caps, replacement);
        if self.global {
            self.regex.replace_all(text, expand).into_owned()
        } else {
            self.regex.replace(text, expand).into_owned()
        }
    }

    fn expand(&self, caps: &Captures<'_>, replacement: &str) -> String {
        let mut out = String::with_capacity(replacement.len());
        let mut rest = replacement;
        while let Some(at) = rest.find('$') {
            out.push_str(&rest[..at]);
            let after = &rest[at + 1..];
            match self.reference(caps, after) {
                Some((text, used)) => {
                    out.push_str(text);
                    rest = &after[used..];
                }
                None => {
                    out.push('$');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Resolve the reference that follows a `$`: the text it expands to and
    /// how many bytes of `after` it spans. `None` keeps the `$` literal.
    fn reference<'t>(&self, caps: &Captures<'t>, after: &str) -> Option<(&'t str, usize)> {
        let group = |m: Option<regex::Match<'t>>| m.map_or("", |m| m.as_str());

        match *after.as_bytes().first()? {
            b'$' => Some(("$", 1)),
            b'&' => Some((group(caps.get(0)), 1)),
            b'0'..=b'9' => {
                // Prefer two digits when that group exists, as `$10` vs `$1` + "0".
                let digits = after.bytes().take(2).take_while(u8::is_ascii_digit).count();
                (1..=digits).rev().find_map(|len| {
                    let index: usize = after[..len].parse().ok()?;
                    (index > 0 && index < caps.len()).then(|| (group(caps.get(index)), len))
                })
            }
            open @ (b'<' | b'{') => {
                let close = if open == b'<' { '>' } else { '}' };
                let end = after.find(close)?;
                let name = &after[1..end];
                self.regex
                    .capture_names()
                    .flatten()
                    .any(|known| known == name)
                    .then(|| (group(caps.name(name)), end + 1))
            }
            _ => None,
        }
    }
}
