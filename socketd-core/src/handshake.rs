//! Negotiated connection parameters, captured once per channel.
//!
//! The handshake is derived from the single Connect (server side) or Connack
//! (client side) message: its event field carries the connection url
//! (`tcp://host/path?user=1&token=2`), its metadata the protocol version.
//! Immutable once set; the channel stores it write-once.

use std::collections::HashMap;

use crate::entity::metas;
use crate::message::Message;

/// Negotiated connection parameters (url, path, query parameters, version).
#[derive(Debug, Clone)]
pub struct Handshake {
    uri: String,
    scheme: String,
    path: String,
    version: Option<String>,
    params: HashMap<String, String>,
}

impl Handshake {
    /// Capture the handshake from a Connect / Connack message.
    #[must_use]
    pub fn new(message: &Message) -> Self {
        let uri = message.event().to_string();
        let version = message
            .meta(metas::META_SOCKETD_VERSION)
            .map(str::to_string);

        let rest = uri.split_once("://").map_or(("", uri.as_str()), |(s, r)| (s, r));
        let scheme = rest.0.to_string();

        // Path starts at the first '/' after the authority; query after '?'.
        let (before_query, query) = match rest.1.split_once('?') {
            Some((b, q)) => (b, Some(q)),
            None => (rest.1, None),
        };
        let path = before_query
            .find('/')
            .map_or(String::new(), |i| before_query[i..].to_string());

        let mut params = HashMap::new();
        if let Some(query) = query {
            for kv in query.split('&') {
                match kv.split_once('=') {
                    Some((k, v)) => params.insert(k.to_string(), v.to_string()),
                    None => params.insert(kv.to_string(), String::new()),
                };
            }
        }

        Self {
            uri,
            scheme,
            path,
            version,
            params,
        }
    }

    /// The full connection url, e.g. `tcp://192.168.0.1/path?user=1`.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The transport scheme part of the url.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The path part of the url (empty when absent).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Protocol version advertised by the peer.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Get a query parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Get a query parameter or a default.
    #[must_use]
    pub fn param_or_default<'a>(&'a self, name: &str, def: &'a str) -> &'a str {
        self.param(name).unwrap_or(def)
    }

    /// All query parameters.
    #[must_use]
    pub const fn param_map(&self) -> &HashMap<String, String> {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn parses_uri_path_and_params() {
        let frame = Frame::connect("s1", "tcp://192.168.0.1:8602/app/chat?user=a&token=1&flag");
        let hs = Handshake::new(frame.message().unwrap());

        assert_eq!(hs.scheme(), "tcp");
        assert_eq!(hs.path(), "/app/chat");
        assert_eq!(hs.param("user"), Some("a"));
        assert_eq!(hs.param("token"), Some("1"));
        assert_eq!(hs.param("flag"), Some(""));
        assert_eq!(hs.param_or_default("missing", "def"), "def");
        assert_eq!(hs.version(), Some(crate::frame::VERSION));
    }

    #[test]
    fn tolerates_bare_authority() {
        let frame = Frame::connect("s1", "ws://example.com");
        let hs = Handshake::new(frame.message().unwrap());

        assert_eq!(hs.scheme(), "ws");
        assert_eq!(hs.path(), "");
        assert!(hs.param_map().is_empty());
    }
}
