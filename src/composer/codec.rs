//! Attachment codec for message bodies on the wire.
//!
//! The backend stores a message as a single string. Attachments travel in
//! the same string:
//!
//! ```text
//! hello||file:image|/uploads/a.png|a.png::file:other|/uploads/b.pdf|b.pdf
//! ```
//!
//! `||` separates free text from the attachment block, `::` separates
//! attachments, and `|` separates an attachment's kind, URL and filename.
//! Bodies are decoded once when a message enters the client.

use thiserror::Error;

use crate::models::{Attachment, AttachmentKind, MessageBody};

pub const BLOCK_SEPARATOR: &str = "||";
pub const ITEM_SEPARATOR: &str = "::";
pub const FIELD_SEPARATOR: char = '|';
const ITEM_PREFIX: &str = "file:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("attachment URL contains a reserved separator: {0}")]
    ReservedInUrl(String),
}

/// Encode a body into its wire string.
pub fn encode(body: &MessageBody) -> Result<String, CodecError> {
    let text = body.text.trim();
    if body.attachments.is_empty() {
        return Ok(text.to_string());
    }

    let mut items = Vec::with_capacity(body.attachments.len());
    for att in &body.attachments {
        if att.url.contains(FIELD_SEPARATOR) || att.url.contains(ITEM_SEPARATOR) {
            return Err(CodecError::ReservedInUrl(att.url.clone()));
        }
        items.push(format!(
            "{}{}{}{}{}{}",
            ITEM_PREFIX,
            att.kind.as_str(),
            FIELD_SEPARATOR,
            att.url,
            FIELD_SEPARATOR,
            sanitize_filename(&att.filename)
        ));
    }

    Ok(format!(
        "{}{}{}",
        text,
        BLOCK_SEPARATOR,
        items.join(ITEM_SEPARATOR)
    ))
}

/// Decode a wire string. Never fails: anything that is not a well-formed
/// attachment block is treated as text.
pub fn decode(raw: &str) -> MessageBody {
    // The block is the suffix after the last `||` that parses completely,
    // so text that itself contains `||` survives.
    for (pos, _) in raw.rmatch_indices(BLOCK_SEPARATOR) {
        let block = &raw[pos + BLOCK_SEPARATOR.len()..];
        if let Some(attachments) = parse_block(block) {
            return MessageBody {
                text: raw[..pos].to_string(),
                attachments,
            };
        }
    }
    MessageBody::text(raw)
}

fn parse_block(block: &str) -> Option<Vec<Attachment>> {
    if block.is_empty() {
        return None;
    }
    block.split(ITEM_SEPARATOR).map(parse_item).collect()
}

fn parse_item(item: &str) -> Option<Attachment> {
    let rest = item.strip_prefix(ITEM_PREFIX)?;
    let mut fields = rest.splitn(3, FIELD_SEPARATOR);
    let kind = match fields.next()? {
        "image" => AttachmentKind::Image,
        _ => AttachmentKind::Other,
    };
    let url = fields.next()?;
    let filename = fields.next().unwrap_or_default();
    Some(Attachment {
        kind,
        url: url.to_string(),
        filename: filename.to_string(),
    })
}

/// Filenames come from the local disk; strip anything that would split the
/// block when decoded.
fn sanitize_filename(name: &str) -> String {
    let cleaned = name
        .replace(BLOCK_SEPARATOR, "_")
        .replace(ITEM_SEPARATOR, "_");
    let trimmed = cleaned.trim_end_matches([':', FIELD_SEPARATOR]);
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn att(kind: AttachmentKind, url: &str, name: &str) -> Attachment {
        Attachment {
            kind,
            url: url.to_string(),
            filename: name.to_string(),
        }
    }

    #[test]
    fn test_text_and_two_attachments() {
        let body = MessageBody {
            text: "hello".into(),
            attachments: vec![
                att(AttachmentKind::Image, "url1", "a.png"),
                att(AttachmentKind::Other, "url2", "b.pdf"),
            ],
        };
        let wire = encode(&body).unwrap();
        assert_eq!(wire, "hello||file:image|url1|a.png::file:other|url2|b.pdf");
        assert_eq!(decode(&wire), body);
    }

    #[test]
    fn test_text_only() {
        let body = MessageBody::text("just words");
        assert_eq!(encode(&body).unwrap(), "just words");
        assert_eq!(decode("just words"), body);
        assert_eq!(decode(""), MessageBody::text(""));
    }

    #[test]
    fn test_attachments_only() {
        let decoded = decode("||file:image|/u/x.png|x.png");
        assert_eq!(decoded.text, "");
        assert_eq!(
            decoded.attachments,
            vec![att(AttachmentKind::Image, "/u/x.png", "x.png")]
        );
    }

    #[test]
    fn test_text_with_separator_stays_text() {
        assert_eq!(decode("a||b"), MessageBody::text("a||b"));

        let body = MessageBody {
            text: "x || y".into(),
            attachments: vec![att(AttachmentKind::Other, "/u/1", "notes.txt")],
        };
        assert_eq!(decode(&encode(&body).unwrap()), body);
    }

    #[test]
    fn test_unknown_kind_and_missing_name() {
        let decoded = decode("hi||file:video|/u/v");
        assert_eq!(decoded.text, "hi");
        assert_eq!(
            decoded.attachments,
            vec![att(AttachmentKind::Other, "/u/v", "")]
        );
    }

    #[test]
    fn test_filename_sanitized() {
        let body = MessageBody {
            text: String::new(),
            attachments: vec![att(AttachmentKind::Other, "/u/1", "odd::name||.txt:")],
        };
        let decoded = decode(&encode(&body).unwrap());
        assert_eq!(decoded.attachments[0].filename, "odd_name_.txt");
    }

    #[test]
    fn test_reserved_url_rejected() {
        let body = MessageBody {
            text: "x".into(),
            attachments: vec![att(AttachmentKind::Other, "http://[::1]/f", "f")],
        };
        assert!(matches!(encode(&body), Err(CodecError::ReservedInUrl(_))));
    }
}
