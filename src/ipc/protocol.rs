//! IPC protocol definitions
//!
//! Newline-delimited JSON exchanged with clients over the Unix socket.
//! Messages are tagged by `type`; replies are plain objects, so a version
//! query answers exactly `{"version": "..."}`.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::net::{ErrorEntry, Response, ResponseSource};
use crate::worker::VersionReply;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from clients to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Activate a waiting generation now
    SkipWaiting,
    /// Add URLs to the current core store
    CacheUrls { urls: Vec<String> },
    /// Delete every store
    ClearCache,
    /// Report the current generation tag
    GetVersion,
    /// Background sync trigger
    Sync { tag: String },
    /// Push trigger
    Push {
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Intercept a request on the client's behalf
    Fetch {
        url: String,
        #[serde(default = "default_method")]
        method: String,
    },
    /// Daemon status
    GetStatus,
}

fn default_method() -> String {
    "GET".to_string()
}

/// A response handed back for a `FETCH` message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body
    pub body: String,
    pub source: ResponseSource,
}

impl From<&Response> for FetchedReply {
    fn from(response: &Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: base64::engine::general_purpose::STANDARD.encode(&response.body),
            source: response.source,
        }
    }
}

impl FetchedReply {
    pub fn decode_body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.body)
    }
}

/// Store name with its entry count (for status replies)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub name: String,
    pub entries: usize,
}

/// Daemon state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub protocol: u32,
    pub generation: Option<String>,
    pub state: Option<String>,
    pub waiting: Option<String>,
    pub clients: usize,
    pub stores: Vec<StoreInfo>,
    pub hits: u64,
    pub misses: u64,
    pub network: String,
    /// Latest network failures seen by the active generation
    #[serde(default)]
    pub recent_errors: Vec<ErrorEntry>,
}

/// Replies sent from the daemon to clients
///
/// Untagged: variants are told apart by their fields, most specific first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Fetched(FetchedReply),
    Status(StatusReply),
    Version(VersionReply),
    #[serde(rename_all = "camelCase")]
    PassThrough { pass_through: bool },
    Ack { ok: bool, message: Option<String> },
    Error { error: String },
}

impl Reply {
    pub fn ack(message: impl Into<String>) -> Self {
        Reply::Ack {
            ok: true,
            message: Some(message.into()),
        }
    }

    pub fn error(error: impl std::fmt::Display) -> Self {
        Reply::Error {
            error: error.to_string(),
        }
    }
}

/// Parse a JSON message from bytes
pub fn parse_message(data: &[u8]) -> Result<Message, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a message to JSON bytes
pub fn serialize_message(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(message)?;
    json.push(b'\n');
    Ok(json)
}

/// Parse a reply line
pub fn parse_reply(data: &[u8]) -> Result<Reply, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a reply to JSON bytes
pub fn serialize_reply(reply: &Reply) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(reply)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_messages() {
        assert!(matches!(parse_message(br#"{"type":"SKIP_WAITING"}"#).unwrap(), Message::SkipWaiting));
        assert!(matches!(parse_message(br#"{"type":"CLEAR_CACHE"}"#).unwrap(), Message::ClearCache));
        assert!(matches!(parse_message(br#"{"type":"GET_VERSION"}"#).unwrap(), Message::GetVersion));

        match parse_message(br#"{"type":"CACHE_URLS","urls":["/a/","/b/"]}"#).unwrap() {
            Message::CacheUrls { urls } => assert_eq!(urls, vec!["/a/", "/b/"]),
            _ => panic!("Expected CacheUrls message"),
        }
    }

    #[test]
    fn test_parse_fetch_defaults_to_get() {
        match parse_message(br#"{"type":"FETCH","url":"https://blog.example.com/"}"#).unwrap() {
            Message::Fetch { url, method } => {
                assert_eq!(url, "https://blog.example.com/");
                assert_eq!(method, "GET");
            }
            _ => panic!("Expected Fetch message"),
        }
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(parse_message(br#"{"type":"REBOOT"}"#).is_err());
    }

    #[test]
    fn test_version_reply_shape() {
        let reply = Reply::Version(VersionReply {
            version: "v2".to_string(),
        });
        let json = serialize_reply(&reply).unwrap();
        assert_eq!(String::from_utf8(json).unwrap(), "{\"version\":\"v2\"}\n");
    }

    #[test]
    fn test_reply_variants_parse_back() {
        let fetched = Reply::Fetched(FetchedReply::from(&Response::new(200, "hi")));
        let json = serialize_reply(&fetched).unwrap();
        match parse_reply(&json).unwrap() {
            Reply::Fetched(reply) => assert_eq!(reply.decode_body().unwrap(), b"hi"),
            other => panic!("Expected Fetched reply, got {:?}", other),
        }

        let json = serialize_reply(&Reply::PassThrough { pass_through: true }).unwrap();
        assert!(String::from_utf8(json.clone()).unwrap().contains("passThrough"));
        assert!(matches!(parse_reply(&json).unwrap(), Reply::PassThrough { .. }));

        let json = serialize_reply(&Reply::error("Invalid message")).unwrap();
        assert!(matches!(parse_reply(&json).unwrap(), Reply::Error { .. }));
    }
}
