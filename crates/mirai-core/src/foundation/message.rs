//! Message chains and their segments.
//!
//! A message on the wire is a `messageChain` array of tagged segment objects.
//! [`Message`] is the content part of such a chain; [`ReceivedMessage`] is an
//! inbound chain split into its `Source`, optional `Quote` and content.

use serde::{Deserialize, Deserializer, Serialize};

use super::types::{GroupId, MessageId, UserId};

// ============================================================================
// Segments
// ============================================================================

/// A single element of a message chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Segment {
    /// Identity of a received message. Always first in an inbound chain.
    Source { id: MessageId, time: i64 },
    #[serde(rename_all = "camelCase")]
    Quote {
        id: MessageId,
        #[serde(default)]
        group_id: GroupId,
        sender_id: UserId,
        #[serde(default)]
        target_id: i64,
        #[serde(default)]
        origin: Vec<Segment>,
    },
    At {
        target: UserId,
        #[serde(default)]
        display: String,
    },
    AtAll,
    #[serde(rename_all = "camelCase")]
    Face {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        face_id: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Plain { text: String },
    Image(ImageRef),
    FlashImage(ImageRef),
    #[serde(rename_all = "camelCase")]
    Voice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Xml { xml: String },
    Json { json: String },
    App { content: String },
    Poke { name: String },
    /// A segment type this client does not model.
    #[serde(other)]
    Unknown,
}

/// Reference to an image, by server-side id, URL or local path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ImageRef {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            image_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }
}

impl Segment {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn at(target: impl Into<UserId>) -> Self {
        Self::At {
            target: target.into(),
            display: String::new(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Plain { text } => Some(text),
            _ => None,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered list of segments with adjacent `Plain` segments merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message holding a single plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        let mut message = Self::new();
        message.push(Segment::plain(text));
        message
    }

    /// Appends a segment, merging it into a trailing `Plain` segment if both are text.
    pub fn push(&mut self, segment: Segment) {
        if let Segment::Plain { text } = &segment
            && let Some(Segment::Plain { text: last }) = self.segments.last_mut()
        {
            last.push_str(text);
            return;
        }
        self.segments.push(segment);
    }

    pub fn plain(mut self, text: impl Into<String>) -> Self {
        self.push(Segment::plain(text));
        self
    }

    pub fn at(mut self, target: impl Into<UserId>) -> Self {
        self.push(Segment::at(target));
        self
    }

    pub fn at_all(mut self) -> Self {
        self.push(Segment::AtAll);
        self
    }

    pub fn image(mut self, image: ImageRef) -> Self {
        self.push(Segment::Image(image));
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Concatenation of all `Plain` segments.
    pub fn plain_text(&self) -> String {
        self.segments.iter().filter_map(Segment::as_text).collect()
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        let mut message = Self::new();
        for segment in iter {
            message.push(segment);
        }
        message
    }
}

impl Extend<Segment> for Message {
    fn extend<I: IntoIterator<Item = Segment>>(&mut self, iter: I) {
        for segment in iter {
            self.push(segment);
        }
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        std::iter::once(segment).collect()
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let segments = Vec::<Segment>::deserialize(deserializer)?;
        Ok(segments.into_iter().collect())
    }
}

// ============================================================================
// Received message
// ============================================================================

/// Identity of a received message, taken from its `Source` segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageSource {
    pub id: MessageId,
    pub time: i64,
}

/// The message a received message quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedMessage {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub target_id: i64,
    pub origin: Message,
}

/// An inbound message chain split into metadata and content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Message")]
pub struct ReceivedMessage {
    pub source: MessageSource,
    pub quote: Option<QuotedMessage>,
    pub content: Message,
}

impl ReceivedMessage {
    pub fn id(&self) -> MessageId {
        self.source.id
    }

    pub fn plain_text(&self) -> String {
        self.content.plain_text()
    }
}

impl From<Message> for ReceivedMessage {
    fn from(chain: Message) -> Self {
        let mut received = Self::default();
        for segment in chain.into_segments() {
            match segment {
                Segment::Source { id, time } => received.source = MessageSource { id, time },
                Segment::Quote {
                    id,
                    group_id,
                    sender_id,
                    target_id,
                    origin,
                } => {
                    received.quote = Some(QuotedMessage {
                        id,
                        group_id,
                        sender_id,
                        target_id,
                        origin: origin.into_iter().collect(),
                    })
                }
                other => received.content.push(other),
            }
        }
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adjacent_plain_segments_merge_on_decode() {
        let message: Message = serde_json::from_value(json!([
            { "type": "Plain", "text": "hello " },
            { "type": "Plain", "text": "world" },
            { "type": "At", "target": 10, "display": "@bob" },
            { "type": "Plain", "text": "!" }
        ]))
        .unwrap();

        assert_eq!(message.len(), 3);
        assert_eq!(message.plain_text(), "hello world!");
    }

    #[test]
    fn unknown_segment_types_are_kept_as_unknown() {
        let message: Message = serde_json::from_value(json!([
            { "type": "MarketFace", "id": 1 },
            { "type": "Plain", "text": "x" }
        ]))
        .unwrap();
        assert_eq!(message.segments()[0], Segment::Unknown);
    }

    #[test]
    fn outgoing_segments_use_wire_shape() {
        let message = Message::text("hi").at(7).image(ImageRef::id("{ABC}.png"));
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!([
                { "type": "Plain", "text": "hi" },
                { "type": "At", "target": 7, "display": "" },
                { "type": "Image", "imageId": "{ABC}.png" }
            ])
        );
    }

    #[test]
    fn received_chain_splits_source_and_quote() {
        let received: ReceivedMessage = serde_json::from_value(json!([
            { "type": "Source", "id": 55, "time": 1600000000 },
            { "type": "Quote", "id": 50, "groupId": 1, "senderId": 2, "targetId": 1,
              "origin": [{ "type": "Plain", "text": "earlier" }] },
            { "type": "Plain", "text": "reply" }
        ]))
        .unwrap();

        assert_eq!(received.id(), MessageId(55));
        let quote = received.quote.as_ref().unwrap();
        assert_eq!(quote.id, MessageId(50));
        assert_eq!(quote.origin.plain_text(), "earlier");
        assert_eq!(received.plain_text(), "reply");
    }
}
