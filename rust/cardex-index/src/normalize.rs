//! Document normalization: flattening the typed attribute set into one
//! contiguous classified character buffer.
//!
//! The normalizer concatenates a document's title, meta fields and body into
//! a single lowercased text buffer, remembering for every span which
//! occurrence-class system it belongs to (body word classes vs. meta
//! classes). Tokenization over that buffer is deliberately trivial (runs of
//! alphanumeric characters), since replicating natural-language tokenization
//! rules is a non-goal; the interesting part is the classification and the
//! position assignment.
//!
//! Body token positions are 1-based and run across the whole body; meta
//! token positions are 1-based within their own field (meta fields are short
//! and unordered, so absolute per-field positions suffice).

use crate::document::{Document, meta_class, word_class};

/// Tokens longer than this many bytes are dropped; they are artifacts, not
/// words.
pub const MAX_TOKEN_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanClass {
    /// Body text with a word class.
    Word(u8),
    /// Meta field with a meta class.
    Meta(u8),
}

#[derive(Debug, Clone, Copy)]
struct Span {
    class: SpanClass,
    start: usize,
    end: usize,
}

/// The flattened, classified text of one document.
pub struct NormalizedDoc {
    text: String,
    spans: Vec<Span>,
}

/// One token of the classified buffer, with its occurrence class and
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Body-text token: `(word class, 1-based body position)`.
    Word { text: &'a str, wtype: u8, pos: u32 },
    /// Meta-field token: `(meta class, 1-based position within the field)`.
    Meta { text: &'a str, mtype: u8, pos: u32 },
}

impl<'a> Token<'a> {
    /// The token text (already lowercased).
    pub fn text(&self) -> &'a str {
        match self {
            Token::Word { text, .. } | Token::Meta { text, .. } => text,
        }
    }
}

/// Flattens a document into its classified buffer.
pub fn normalize(doc: &Document) -> NormalizedDoc {
    let mut text = String::with_capacity(doc.body.len() + 64);
    let mut spans = Vec::new();

    let mut push_span = |text: &mut String, class: SpanClass, content: &str| {
        if content.is_empty() {
            return;
        }
        let start = text.len();
        for c in content.chars() {
            text.extend(c.to_lowercase());
        }
        spans.push(Span {
            class,
            start,
            end: text.len(),
        });
    };

    if let Some(title) = &doc.title {
        push_span(&mut text, SpanClass::Meta(meta_class::TITLE), title);
    }
    for field in &doc.meta {
        push_span(&mut text, SpanClass::Meta(field.class & 7), &field.text);
    }
    push_span(&mut text, SpanClass::Word(word_class::PLAIN), &doc.body);

    NormalizedDoc { text, spans }
}

impl NormalizedDoc {
    /// The flattened lowercased text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Iterates the classified tokens of the buffer in span order.
    pub fn tokens(&self) -> Tokens<'_> {
        Tokens {
            doc: self,
            span_ix: 0,
            byte_ix: self.spans.first().map(|s| s.start).unwrap_or(0),
            body_pos: 0,
            meta_pos: 0,
        }
    }
}

/// Iterator over the tokens of a [`NormalizedDoc`].
pub struct Tokens<'a> {
    doc: &'a NormalizedDoc,
    span_ix: usize,
    byte_ix: usize,
    body_pos: u32,
    meta_pos: u32,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            let span = *self.doc.spans.get(self.span_ix)?;
            let rest = &self.doc.text[self.byte_ix..span.end];

            let Some(rel_start) = rest.find(|c: char| c.is_alphanumeric()) else {
                self.span_ix += 1;
                self.meta_pos = 0;
                self.byte_ix = self
                    .doc
                    .spans
                    .get(self.span_ix)
                    .map(|s| s.start)
                    .unwrap_or(self.doc.text.len());
                continue;
            };
            let rest = &rest[rel_start..];
            let rel_end = rest
                .find(|c: char| !c.is_alphanumeric())
                .unwrap_or(rest.len());
            let token = &rest[..rel_end];
            self.byte_ix += rel_start + rel_end;

            if token.len() > MAX_TOKEN_LEN {
                // The artifact still occupies a position.
                match span.class {
                    SpanClass::Word(_) => self.body_pos += 1,
                    SpanClass::Meta(_) => self.meta_pos += 1,
                }
                continue;
            }
            return Some(match span.class {
                SpanClass::Word(wtype) => {
                    self.body_pos += 1;
                    Token::Word {
                        text: token,
                        wtype,
                        pos: self.body_pos,
                    }
                }
                SpanClass::Meta(mtype) => {
                    self.meta_pos += 1;
                    Token::Meta {
                        text: token,
                        mtype,
                        pos: self.meta_pos,
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MetaField;

    #[test]
    fn test_body_positions_are_one_based() {
        let doc = Document {
            body: "One two, three!".to_string(),
            ..Default::default()
        };
        let norm = normalize(&doc);
        let tokens: Vec<_> = norm.tokens().collect();
        assert_eq!(
            tokens,
            vec![
                Token::Word {
                    text: "one",
                    wtype: word_class::PLAIN,
                    pos: 1
                },
                Token::Word {
                    text: "two",
                    wtype: word_class::PLAIN,
                    pos: 2
                },
                Token::Word {
                    text: "three",
                    wtype: word_class::PLAIN,
                    pos: 3
                },
            ]
        );
    }

    #[test]
    fn test_meta_positions_restart_per_field() {
        let doc = Document {
            title: Some("My Title".to_string()),
            meta: vec![MetaField {
                class: meta_class::KEYWORDS,
                text: "alpha beta".to_string(),
            }],
            body: "body".to_string(),
            ..Default::default()
        };
        let norm = normalize(&doc);
        let tokens: Vec<_> = norm.tokens().collect();
        assert_eq!(
            tokens[0],
            Token::Meta {
                text: "my",
                mtype: meta_class::TITLE,
                pos: 1
            }
        );
        assert_eq!(
            tokens[1],
            Token::Meta {
                text: "title",
                mtype: meta_class::TITLE,
                pos: 2
            }
        );
        assert_eq!(
            tokens[2],
            Token::Meta {
                text: "alpha",
                mtype: meta_class::KEYWORDS,
                pos: 1
            }
        );
        assert_eq!(
            tokens[3],
            Token::Meta {
                text: "beta",
                mtype: meta_class::KEYWORDS,
                pos: 2
            }
        );
        assert_eq!(
            tokens[4],
            Token::Word {
                text: "body",
                wtype: word_class::PLAIN,
                pos: 1
            }
        );
    }

    #[test]
    fn test_lowercasing() {
        let doc = Document {
            body: "HeLLo WORLD".to_string(),
            ..Default::default()
        };
        let norm = normalize(&doc);
        let texts: Vec<_> = norm.tokens().map(|t| t.text().to_string()).collect();
        assert_eq!(texts, vec!["hello", "world"]);
    }

    #[test]
    fn test_overlong_token_dropped() {
        let doc = Document {
            body: format!("ok {} fine", "x".repeat(MAX_TOKEN_LEN + 1)),
            ..Default::default()
        };
        let norm = normalize(&doc);
        let texts: Vec<_> = norm.tokens().map(|t| t.text().to_string()).collect();
        assert_eq!(texts, vec!["ok", "fine"]);
        // Positions still advance for the dropped token's successors.
        let positions: Vec<_> = norm
            .tokens()
            .map(|t| match t {
                Token::Word { pos, .. } => pos,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(positions, vec![1, 3]);
    }

    #[test]
    fn test_empty_document() {
        let doc = Document::default();
        let norm = normalize(&doc);
        assert_eq!(norm.tokens().count(), 0);
    }
}
