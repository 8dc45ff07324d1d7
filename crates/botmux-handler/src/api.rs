//! Outbound bot API client speaking through the egress proxy.
//!
//! Calls go to `{endpoint}/proxy{handler_token}/{method}`; the proxy swaps
//! the token segment for the real bot credentials before relaying.

use botmux_core::error::{scrub_token, MuxError};
use botmux_core::update::Message;

pub struct ProxyApi {
    client: reqwest::Client,
    base_url: String,
}

impl ProxyApi {
    pub fn new(endpoint: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/proxy{}", endpoint.trim_end_matches('/'), token),
        }
    }

    /// Send a text message to a chat.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), MuxError> {
        self.call(
            "sendMessage",
            serde_json::json!({ "chat_id": chat_id, "text": text }),
        )
        .await
    }

    /// Send a text message as a reply to `message`.
    pub async fn reply_to(&self, message: &Message, text: &str) -> Result<(), MuxError> {
        self.call(
            "sendMessage",
            serde_json::json!({
                "chat_id": message.chat.id,
                "text": text,
                "reply_to_message_id": message.message_id,
            }),
        )
        .await
    }

    /// Send a sticker by file id.
    pub async fn send_sticker(&self, chat_id: i64, file_id: &str) -> Result<(), MuxError> {
        self.call(
            "sendSticker",
            serde_json::json!({ "chat_id": chat_id, "sticker": file_id }),
        )
        .await
    }

    /// Send a chat action (e.g. "typing").
    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), MuxError> {
        self.call(
            "sendChatAction",
            serde_json::json!({ "chat_id": chat_id, "action": action }),
        )
        .await
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), MuxError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MuxError::Transport(scrub_token(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MuxError::Api(format!("{method} failed ({status}): {text}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_message_posts_to_proxy_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/proxyhandler-token/sendMessage")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "chat_id": 42,
                "text": "hello",
            })))
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let api = ProxyApi::new(&server.url(), "handler-token");
        api.send_message(42, "hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_denied_method_surfaces_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/proxyhandler-token/sendSticker")
            .with_status(403)
            .create_async()
            .await;

        let api = ProxyApi::new(&server.url(), "handler-token");
        let err = api.send_sticker(42, "sticker-id").await.unwrap_err();
        match err {
            MuxError::Api(msg) => assert!(msg.contains("403"), "unexpected: {msg}"),
            other => panic!("expected API error, got {other:?}"),
        }
    }
}
