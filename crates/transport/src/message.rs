use std::collections::HashMap;

use bytes::Bytes;

/// String-keyed message headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for the given header name, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Inserts a header, replacing any previous value.
    pub fn insert<K, V>(&mut self, name: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(name.into(), value.into());
    }

    /// Returns `true` if no headers are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One inbound transport message, as delivered to a reply destination.
#[derive(Clone, Debug)]
pub struct WireMessage {
    /// The subject the message was delivered on.
    pub subject: String,

    /// The message payload. Empty for pure status messages.
    pub payload: Bytes,

    /// Message headers.
    pub headers: Headers,

    /// Status code, set when the message is a status rather than data.
    pub status: Option<u16>,

    /// Human-readable status description, if the sender supplied one.
    pub description: Option<String>,
}

impl WireMessage {
    /// Creates a data message carrying a payload and headers.
    #[must_use]
    pub fn data<S: Into<String>>(subject: S, headers: Headers, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            payload,
            headers,
            status: None,
            description: None,
        }
    }

    /// Creates a payload-less status message.
    #[must_use]
    pub fn status<S: Into<String>, D: Into<String>>(subject: S, code: u16, description: D) -> Self {
        Self {
            subject: subject.into(),
            payload: Bytes::new(),
            headers: Headers::new(),
            status: Some(code),
            description: Some(description.into()),
        }
    }
}
