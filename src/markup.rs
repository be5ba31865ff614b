//! Depth-aware reader for MARC21-XML record markup.
//!
//! The block text is tokenized with `logos` into tags and text runs, then
//! walked with an explicit element stack. Every closed `datafield` is
//! yielded as a [`FieldGroup`]; structural problems end the walk with a
//! [`StructuralParseError`].
//!
//! Namespace prefixes are ignored, so `<marc:datafield>` and `<datafield>`
//! are the same element. Declarations, comments, processing instructions
//! and the content of `leader` / `controlfield` are skipped.

use std::borrow::Cow;

use log::trace;
use logos::{Lexer, Logos};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::StructuralParseError;
use crate::field::FieldGroup;

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute pattern")
});

static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[A-Za-z]+);").expect("entity pattern"));

#[derive(Logos, Debug, PartialEq, Clone, Copy)]
enum Token {
    #[token("<!--", skip_comment)]
    Comment,

    #[token("<![CDATA[", read_cdata)]
    CData,

    #[regex(r"<![A-Za-z][^>\[]*>")]
    Declaration,

    #[regex(r"<\?[^>]*>")]
    Instruction,

    #[regex(r"</[^>]*>")]
    Close,

    #[regex(r#"<[A-Za-z_]([^>"']|"[^"]*"|'[^']*')*>"#)]
    Open,

    #[regex(r"[^<]+")]
    Text,
}

fn skip_comment(lex: &mut Lexer<Token>) -> bool {
    bump_past(lex, "-->")
}

fn read_cdata(lex: &mut Lexer<Token>) -> bool {
    bump_past(lex, "]]>")
}

fn bump_past(lex: &mut Lexer<Token>, terminator: &str) -> bool {
    match lex.remainder().find(terminator) {
        Some(end) => {
            lex.bump(end + terminator.len());
            true
        }
        None => false,
    }
}

/// Decode the predefined entities and numeric character references.
///
/// Unknown entities and invalid code points are kept verbatim.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    ENTITY.replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        let decoded = match name {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => name
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| name.strip_prefix('#').map(str::parse::<u32>))
                .and_then(Result::ok)
                .and_then(char::from_u32),
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
}

/// Element name without namespace prefix.
fn local_name(qualified: &str) -> &str {
    qualified
        .rsplit_once(':')
        .map_or(qualified, |(_, local)| local)
}

/// A parsed start tag.
struct StartTag<'a> {
    name: &'a str,
    attributes: &'a str,
    self_closing: bool,
}

impl<'a> StartTag<'a> {
    fn parse(slice: &'a str) -> Self {
        let inner = &slice[1..slice.len() - 1];
        let (inner, self_closing) = match inner.strip_suffix('/') {
            Some(rest) => (rest, true),
            None => (inner, false),
        };
        let split = inner
            .find(|c: char| c.is_whitespace())
            .unwrap_or(inner.len());
        Self {
            name: local_name(&inner[..split]),
            attributes: &inner[split..],
            self_closing,
        }
    }

    fn attribute(&self, wanted: &str) -> Option<String> {
        ATTRIBUTE.captures_iter(self.attributes).find_map(|caps| {
            (local_name(&caps[1]) == wanted).then(|| {
                let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
                decode_entities(value).into_owned()
            })
        })
    }
}

/// Streaming reader over the datafields of one record.
///
/// Yields each datafield as it closes. After the first error the reader is
/// exhausted.
pub struct MarkupReader<'a> {
    lexer: Lexer<'a, Token>,
    stack: Vec<String>,
    field: Option<FieldGroup>,
    subfield: Option<(char, String)>,
    seen_record: bool,
    done: bool,
}

impl<'a> MarkupReader<'a> {
    pub fn new(markup: &'a str) -> Self {
        Self {
            lexer: Token::lexer(markup),
            stack: Vec::new(),
            field: None,
            subfield: None,
            seen_record: false,
            done: false,
        }
    }

    /// Current element nesting depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn open(&mut self, tag: StartTag<'_>) -> Result<Option<FieldGroup>, StructuralParseError> {
        if self.subfield.is_some() {
            return Err(StructuralParseError::ElementInSubfield(tag.name.to_string()));
        }
        match tag.name {
            "record" => self.seen_record = true,
            "datafield" => {
                let code = tag
                    .attribute("tag")
                    .ok_or(StructuralParseError::MissingAttribute {
                        element: "datafield",
                        attribute: "tag",
                    })?;
                if let Some(open) = &self.field {
                    return Err(StructuralParseError::NestedDataField(open.tag().to_string()));
                }
                let indicator = |name: &str| {
                    tag.attribute(name)
                        .and_then(|value| value.chars().next())
                        .unwrap_or(' ')
                };
                let field = FieldGroup::new(code, indicator("ind1"), indicator("ind2"));
                if tag.self_closing {
                    return Ok(Some(field));
                }
                self.field = Some(field);
            }
            "subfield" => {
                let Some(field) = self.field.as_mut() else {
                    return Err(StructuralParseError::OrphanSubfield);
                };
                let code = tag
                    .attribute("code")
                    .ok_or(StructuralParseError::MissingAttribute {
                        element: "subfield",
                        attribute: "code",
                    })?;
                let mut chars = code.chars();
                let (Some(c), None) = (chars.next(), chars.next()) else {
                    return Err(StructuralParseError::InvalidSubfieldCode(code));
                };
                if tag.self_closing {
                    field.push(c, "");
                    return Ok(None);
                }
                self.subfield = Some((c, String::new()));
            }
            _ => {}
        }
        if !tag.self_closing {
            self.stack.push(tag.name.to_string());
        }
        Ok(None)
    }

    fn close(&mut self, slice: &str) -> Result<Option<FieldGroup>, StructuralParseError> {
        let name = local_name(slice[2..slice.len() - 1].trim());
        let Some(expected) = self.stack.pop() else {
            return Err(StructuralParseError::UnmatchedClose(name.to_string()));
        };
        if expected != name {
            return Err(StructuralParseError::MismatchedClose {
                expected,
                found: name.to_string(),
            });
        }
        match name {
            "subfield" => {
                if let (Some((code, value)), Some(field)) =
                    (self.subfield.take(), self.field.as_mut())
                {
                    trace!("subfield {}${code} = \"{value}\"", field.tag());
                    field.push(code, value);
                }
                Ok(None)
            }
            "datafield" => Ok(self.field.take()),
            _ => Ok(None),
        }
    }

    fn step(&mut self) -> Option<Result<FieldGroup, StructuralParseError>> {
        while let Some(token) = self.lexer.next() {
            let result = match token {
                Ok(Token::Open) => self.open(StartTag::parse(self.lexer.slice())),
                Ok(Token::Close) => {
                    let slice = self.lexer.slice();
                    self.close(slice)
                }
                Ok(Token::Text) => {
                    if let Some((_, value)) = self.subfield.as_mut() {
                        value.push_str(&decode_entities(self.lexer.slice()));
                    }
                    Ok(None)
                }
                Ok(Token::CData) => {
                    if let Some((_, value)) = self.subfield.as_mut() {
                        let slice = self.lexer.slice();
                        value.push_str(&slice[9..slice.len() - 3]);
                    }
                    Ok(None)
                }
                Ok(Token::Comment | Token::Declaration | Token::Instruction) => Ok(None),
                Err(()) => Err(StructuralParseError::Malformed(self.lexer.span().start)),
            };
            match result {
                Ok(Some(field)) => return Some(Ok(field)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }

        if let Some(open) = self.stack.pop() {
            return Some(Err(StructuralParseError::Unclosed(open)));
        }
        if !self.seen_record {
            return Some(Err(StructuralParseError::MissingRecord));
        }
        None
    }
}

impl Iterator for MarkupReader<'_> {
    type Item = Result<FieldGroup, StructuralParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.step();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// Read all datafields of one record.
pub fn read_fields(markup: &str) -> Result<Vec<FieldGroup>, StructuralParseError> {
    MarkupReader::new(markup).collect()
}
