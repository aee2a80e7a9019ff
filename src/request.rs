//! Normalized request handed from the protocol layer to the dispatcher.

/// A binary attachment with its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One part of a request, in the order the client sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    Attachment(Attachment),
}

/// An ordered sequence of text fragments and attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub parts: Vec<RequestPart>,
}

impl Request {
    pub fn new(parts: Vec<RequestPart>) -> Self {
        Self { parts }
    }

    /// Convenience constructor for a text-only request.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![RequestPart::Text(text.into())],
        }
    }

    pub fn with_attachment(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.parts.push(RequestPart::Attachment(Attachment {
            mime_type: mime_type.into(),
            data,
        }));
        self
    }

    /// Whether any part carries non-blank text.
    pub fn has_text(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, RequestPart::Text(t) if !t.trim().is_empty()))
    }

    /// All text parts joined by a single space, trimmed.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                RequestPart::Text(t) => Some(t.trim()),
                RequestPart::Attachment(_) => None,
            })
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.parts.iter().filter_map(|p| match p {
            RequestPart::Attachment(a) => Some(a),
            RequestPart::Text(_) => None,
        })
    }

    pub fn has_attachments(&self) -> bool {
        self.attachments().next().is_some()
    }

    /// Append the parts of a follow-up message.
    pub fn extend(&mut self, other: Request) {
        self.parts.extend(other.parts);
    }
}
