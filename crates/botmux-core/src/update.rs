//! Telegram update envelope: the typed model and the zero-copy raw carrier.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::sync::mpsc;

use crate::error::MuxError;
use crate::stream::{self, Item};

/// A Telegram Bot API update envelope.
///
/// Optional fields are omitted on serialization so an update survives a
/// serialize/deserialize round trip between the proxy and its handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl Update {
    /// Message text, when this update carries a text message.
    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.text.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    /// Chat type: "private", "group", "supergroup", or "channel".
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub chat_type: String,
}

/// The raw JSON of a single update, aliased into the poll response buffer.
///
/// Holding the fragment as a refcounted slice keeps the whole batch at one
/// allocation: the response body must stay alive while any fragment of it
/// is still in flight, which `Bytes` guarantees by construction.
#[derive(Debug, Clone)]
pub struct RawUpdate {
    json: Bytes,
}

impl RawUpdate {
    /// Alias `fragment` (which must borrow from `buf`) as a slice of `buf`.
    pub fn alias(buf: &Bytes, fragment: &RawValue) -> Result<Self, MuxError> {
        let text = fragment.get();
        let base = buf.as_ref().as_ptr() as usize;
        let start = (text.as_ptr() as usize)
            .checked_sub(base)
            .filter(|s| s + text.len() <= buf.len())
            .ok_or_else(|| {
                MuxError::Api("update fragment does not alias the response buffer".into())
            })?;
        Ok(Self {
            json: buf.slice(start..start + text.len()),
        })
    }

    /// A raw update owning its own buffer. Used at trust boundaries where
    /// there is no batch buffer to alias (and in tests).
    pub fn from_owned(json: impl Into<Bytes>) -> Self {
        Self { json: json.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.json
    }

    /// Extract just the `update_id`, leaving the rest of the JSON untouched.
    pub fn update_id(&self) -> Result<i64, MuxError> {
        #[derive(Deserialize)]
        struct UpdateId {
            update_id: i64,
        }
        let id: UpdateId = serde_json::from_slice(&self.json)?;
        Ok(id.update_id)
    }

    /// Decode into the typed envelope.
    pub fn decode(&self) -> Result<Update, MuxError> {
        Ok(serde_json::from_slice(&self.json)?)
    }
}

/// Map a raw update stream to a typed update stream, decoding JSON in
/// parallel while preserving input order.
pub fn decoded(input: mpsc::Receiver<Item<RawUpdate>>, capacity: usize) -> mpsc::Receiver<Item<Update>> {
    stream::mapped(input, |raw| raw.decode(), capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_update(id: i64, text: &str) -> Update {
        Update {
            update_id: id,
            message: Some(Message {
                message_id: id * 10,
                from: Some(User {
                    id: 42,
                    first_name: "Ada".into(),
                    last_name: None,
                    username: Some("ada".into()),
                }),
                chat: Chat {
                    id: 100,
                    chat_type: "private".into(),
                },
                text: Some(text.into()),
                caption: None,
            }),
        }
    }

    #[test]
    fn test_update_round_trip() {
        let update = text_update(7, "/start");
        let json = serde_json::to_vec(&update).unwrap();
        let back: Update = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, update);
    }

    #[test]
    fn test_update_without_message_round_trip() {
        let update = Update {
            update_id: 3,
            message: None,
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"update_id":3}"#);
        let back: Update = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }

    #[test]
    fn test_text_accessor() {
        assert_eq!(text_update(1, "/go").text(), Some("/go"));
        let no_message = Update {
            update_id: 1,
            message: None,
        };
        assert_eq!(no_message.text(), None);
    }

    #[test]
    fn test_raw_update_aliases_buffer() {
        let body = Bytes::from_static(
            br#"{"ok":true,"result":[{"update_id":5,"message":{"message_id":1,"chat":{"id":9,"type":"private"},"text":"/a"}}]}"#,
        );
        #[derive(Deserialize)]
        struct Wrapper<'a> {
            #[serde(borrow)]
            result: Vec<&'a RawValue>,
        }
        let wrapper: Wrapper = serde_json::from_slice(&body).unwrap();
        let raw = RawUpdate::alias(&body, wrapper.result[0]).unwrap();

        // The fragment is a view of the original allocation, not a copy.
        let base = body.as_ref().as_ptr() as usize;
        let frag = raw.as_bytes().as_ptr() as usize;
        assert!(frag >= base && frag < base + body.len());

        assert_eq!(raw.update_id().unwrap(), 5);
        let update = raw.decode().unwrap();
        assert_eq!(update.text(), Some("/a"));
    }

    #[test]
    fn test_raw_update_rejects_foreign_fragment() {
        let body = Bytes::from_static(br#"{"ok":true,"result":[]}"#);
        let foreign = serde_json::from_str::<Box<RawValue>>(r#"{"update_id":1}"#).unwrap();
        assert!(RawUpdate::alias(&body, &foreign).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_decoded_stream() {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            tx.send(Ok(RawUpdate::from_owned(
                &br#"{"update_id":1,"message":{"message_id":1,"chat":{"id":9,"type":"private"},"text":"/one"}}"#[..],
            )))
            .await
            .unwrap();
            tx.send(Ok(RawUpdate::from_owned(&b"{not json"[..])))
                .await
                .unwrap();
            tx.send(Ok(RawUpdate::from_owned(&br#"{"update_id":2}"#[..])))
                .await
                .unwrap();
        });

        let mut out = decoded(rx, 4);
        let first = out.recv().await.unwrap().unwrap();
        assert_eq!(first.update_id, 1);
        assert_eq!(first.text(), Some("/one"));
        assert!(matches!(
            out.recv().await.unwrap(),
            Err(MuxError::Serialization(_))
        ));
        assert_eq!(out.recv().await.unwrap().unwrap().update_id, 2);
        assert!(out.recv().await.is_none());
    }
}
