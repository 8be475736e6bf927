//! Mention placeholder scanning.
//!
//! Two syntaxes are recognized:
//!
//! - `@{name}`: braced, the name runs up to the closing brace and may contain
//!   spaces. Empty names, unterminated braces and names containing `@`, `{`
//!   or a newline are not mentions. A rejected placeholder that still closes
//!   on its line (`@{foo@bar}`) is skipped whole, so nothing inside it is
//!   picked up as a bare mention.
//! - `@name`: bare, the name is a run of letters, digits, `_` and `-` that must
//!   be followed by whitespace, punctuation (any script) or the end of the
//!   text.
//!
//! The scanner only ever stops at `@` bytes, so text without any `@` costs a
//! single pass over its bytes.

use std::ops::Range;

use unicode_categories::UnicodeCategories;

/// Which placeholder form produced a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionSyntax {
    Braced,
    Bare,
}

/// One recognized placeholder. Offsets are byte offsets into the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MentionToken<'a> {
    pub name: &'a str,
    pub start: usize,
    pub end: usize,
    pub syntax: MentionSyntax,
}

impl MentionToken<'_> {
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Returns a lazy iterator over the mentions in `text`.
///
/// The iterator is `Clone`, so a scan can be restarted from any point.
#[must_use]
pub fn tokenize(text: &str) -> Tokens<'_> {
    Tokens::new(text)
}

/// Iterator over [`MentionToken`]s, in left-to-right order.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        let pos = if text.as_bytes().contains(&b'@') {
            0
        } else {
            text.len()
        };
        Self { text, pos }
    }

    fn braced(&self, at: usize) -> Option<MentionToken<'a>> {
        let inner = self.text[at + 1..].strip_prefix('{')?;
        let close = inner.find(|c: char| matches!(c, '}' | '{' | '@' | '\n'))?;
        if !inner[close..].starts_with('}') {
            return None;
        }

        let name = inner[..close].trim();
        if name.is_empty() {
            return None;
        }

        Some(MentionToken {
            name,
            start: at,
            // '@' + '{' + name + '}'
            end: at + close + 3,
            syntax: MentionSyntax::Braced,
        })
    }

    /// End of a rejected `@{...}` that closes before the next `{` or line
    /// break.
    fn malformed_braced_end(&self, at: usize) -> Option<usize> {
        let inner = self.text[at + 1..].strip_prefix('{')?;
        let stop = inner.find(|c: char| matches!(c, '}' | '{' | '\n'))?;
        inner[stop..].starts_with('}').then_some(at + stop + 3)
    }

    fn bare(&self, at: usize) -> Option<MentionToken<'a>> {
        let rest = &self.text[at + 1..];
        let len: usize = rest
            .chars()
            .take_while(|&c| is_name_char(c))
            .map(char::len_utf8)
            .sum();
        if len == 0 {
            return None;
        }
        if !rest[len..].chars().next().is_none_or(is_boundary) {
            return None;
        }

        Some(MentionToken {
            name: &rest[..len],
            start: at,
            end: at + 1 + len,
            syntax: MentionSyntax::Bare,
        })
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = MentionToken<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.text.len() {
            let Some(offset) = self.text.as_bytes()[self.pos..]
                .iter()
                .position(|&b| b == b'@')
            else {
                self.pos = self.text.len();
                break;
            };

            let at = self.pos + offset;
            self.pos = at + 1;

            if let Some(token) = self.braced(at).or_else(|| self.bare(at)) {
                self.pos = token.end;
                return Some(token);
            }
            if let Some(end) = self.malformed_braced_end(at) {
                self.pos = end;
            }
        }
        None
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Emoji and other symbols are not boundaries, except the ASCII ones.
fn is_boundary(c: char) -> bool {
    c.is_whitespace() || c.is_ascii_punctuation() || c.is_punctuation()
}
