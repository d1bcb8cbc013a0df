//! The immutable message envelope carried by the pipe.

use crate::payload::Payload;

/// A topic plus a payload.
///
/// Topics are dot-delimited strings such as `nginx.config.apply`. Nothing
/// about a message can change after construction.
#[derive(Debug, Clone)]
pub struct Message {
    topic: String,
    data: Payload,
}

impl Message {
    /// Creates a message. The topic is not validated.
    pub fn new(topic: impl Into<String>, data: impl Into<Payload>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
        }
    }

    /// Creates a message without a payload.
    pub fn empty(topic: impl Into<String>) -> Self {
        Self::new(topic, Payload::None)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// True when the topic equals `topic` byte for byte.
    pub fn exact(&self, topic: &str) -> bool {
        self.topic == topic
    }

    /// True when the topic starts with `prefix`.
    ///
    /// This is a literal string prefix, not a segment match: `"test.top"`
    /// matches `"test.topic.one"`.
    pub fn matches(&self, prefix: &str) -> bool {
        self.topic.starts_with(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const TOPIC: &str = "test.topic.one";

    #[rstest]
    #[case("test.topic.one", true)]
    #[case("test.topic", false)]
    #[case("test.topic.one.two", false)]
    #[case("", false)]
    fn exact_compares_whole_topic(#[case] candidate: &str, #[case] expected: bool) {
        let msg = Message::empty(TOPIC);
        assert_eq!(msg.exact(candidate), expected);
    }

    #[rstest]
    #[case("", true)]
    #[case("test.", true)]
    #[case("test.top", true)]
    #[case("test.topic.", true)]
    #[case("test.topic.one", true)]
    #[case("a-test.", false)]
    #[case("test.topics.", false)]
    #[case("test.topic.sub", false)]
    fn matches_is_a_literal_prefix(#[case] prefix: &str, #[case] expected: bool) {
        let msg = Message::empty(TOPIC);
        assert_eq!(msg.matches(prefix), expected);
    }

    #[test]
    fn payload_is_kept() {
        let msg = Message::new(TOPIC, true);
        assert_eq!(msg.topic(), TOPIC);
        assert_eq!(msg.data().as_flag(), Some(true));
    }
}
