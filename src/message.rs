//! MIME view of a submitted message
//!
//! Wraps [`mailparse`] and exposes the subject plus the leaf parts of the
//! MIME tree, in the order they appear, each classified by how it should
//! be treated.

use mailparse::{DispositionType, MailHeaderMap, MailParseError, ParsedMail};

use crate::error::GatewayError;

/// How a leaf part is treated when building the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    /// Plain text meant to be displayed as the message
    Inline,
    /// Other text body (HTML, enriched, ...), used when no plain text exists
    InlineRich,
    /// A file carried along with the message
    Attachment,
    /// Anything else (inline images, ...)
    Other,
}

/// A parsed RFC 5322 message
#[derive(Debug)]
pub struct ParsedMessage<'a> {
    mail: ParsedMail<'a>,
}

impl<'a> ParsedMessage<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, GatewayError> {
        let mail = mailparse::parse_mail(raw)?;
        Ok(Self { mail })
    }

    /// Decoded `Subject` header, empty if missing
    pub fn subject(&self) -> String {
        self.mail
            .headers
            .get_first_value("Subject")
            .unwrap_or_default()
    }

    /// Leaf parts in depth-first order
    pub fn parts(&self) -> Parts<'_> {
        Parts {
            stack: vec![(&self.mail, false)],
        }
    }
}

/// Iterator over the leaf parts of a message
#[derive(Debug)]
pub struct Parts<'m> {
    stack: Vec<(&'m ParsedMail<'m>, bool)>,
}

impl<'m> Iterator for Parts<'m> {
    type Item = Part<'m>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((mail, nested)) = self.stack.pop() {
            if mail.subparts.is_empty() {
                if mail.ctype.mimetype.starts_with("multipart/") {
                    continue;
                }
                return Some(Part { mail, nested });
            }
            // Reverse so the first child is popped first.
            self.stack
                .extend(mail.subparts.iter().rev().map(|child| (child, true)));
        }
        None
    }
}

/// A single leaf of the MIME tree
#[derive(Debug, Clone, Copy)]
pub struct Part<'m> {
    mail: &'m ParsedMail<'m>,
    nested: bool,
}

impl<'m> Part<'m> {
    pub fn kind(&self) -> PartKind {
        if matches!(
            self.mail.get_content_disposition().disposition,
            DispositionType::Attachment
        ) {
            PartKind::Attachment
        } else if self.mail.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
            PartKind::Inline
        } else if self.mail.ctype.mimetype.to_ascii_lowercase().starts_with("text/") {
            PartKind::InlineRich
        } else {
            PartKind::Other
        }
    }

    /// Media type from an explicit `Content-Type` header.
    ///
    /// `None` when the header is absent; the parser's `text/plain`
    /// default does not count.
    pub fn content_type(&self) -> Option<String> {
        self.mail.headers.get_first_header("Content-Type")?;
        Some(self.mail.ctype.mimetype.clone()).filter(|mimetype| !mimetype.is_empty())
    }

    /// File name from `Content-Disposition`, falling back to the
    /// `name` parameter of `Content-Type`
    pub fn filename(&self) -> Option<String> {
        let disposition = self.mail.get_content_disposition();
        disposition
            .params
            .get("filename")
            .or_else(|| self.mail.ctype.params.get("name"))
            .filter(|name| !name.is_empty())
            .cloned()
    }

    /// Decoded text content.
    ///
    /// Inside a multipart the line break before the next boundary belongs
    /// to the delimiter, so it is not returned.
    pub fn text(&self) -> Result<String, MailParseError> {
        let mut body = self.mail.get_body()?;
        if self.nested {
            if body.ends_with("\r\n") {
                body.truncate(body.len() - 2);
            } else if body.ends_with('\n') || body.ends_with('\r') {
                body.truncate(body.len() - 1);
            }
        }
        Ok(body)
    }

    /// Decoded binary content
    pub fn bytes(&self) -> Result<Vec<u8>, MailParseError> {
        self.mail.get_body_raw()
    }
}
