use anyhow::{Context, Result};
use common::AgentError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::env;
use tokio::time::Duration;

const REQUEST_TIMEOUT: u64 = 30;
/// Telegram rejects messages over 4096 chars. Stop editing well before that
/// and start a fresh message instead.
const EDIT_CHAR_BUDGET: usize = 3500;

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    description: Option<String>,
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Posts run commentary to a Telegram chat. Each run opens a new message and
/// later lines are appended by editing it, so one run reads as one thread.
pub struct TelegramNotifier {
    client: Client,
    token: Option<String>,
    chat_id: Option<String>,
    last_message: Option<(i64, String)>,
}

impl TelegramNotifier {
    pub fn from_env(enabled: bool) -> Result<Self> {
        let (token, chat_id) = if enabled {
            match (env::var("TELEGRAM_BOT_TOKEN"), env::var("TELEGRAM_CHAT_ID")) {
                (Ok(token), Ok(chat_id)) => (Some(token), Some(chat_id)),
                _ => {
                    println!("⚠️ Telegram enabled but TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID is missing, notifications off");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT))
                .build()?,
            token,
            chat_id,
            last_message: None,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }

    /// Post `text` as a new message and remember it as the edit target.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        let (token, chat_id) = match (&self.token, &self.chat_id) {
            (Some(token), Some(chat_id)) => (token.clone(), chat_id.clone()),
            _ => return Ok(()),
        };

        let reply = self
            .call(
                &format!("https://api.telegram.org/bot{}/sendMessage", token),
                json!({ "chat_id": chat_id, "text": text }),
            )
            .await?;

        if let Some(message) = reply.result {
            self.last_message = Some((message.message_id, text.to_string()));
        }
        Ok(())
    }

    /// Extend the current message with `text`, or start a new message when
    /// none is open yet or the edit budget is spent.
    pub async fn append(&mut self, text: &str) -> Result<()> {
        let (token, chat_id) = match (&self.token, &self.chat_id) {
            (Some(token), Some(chat_id)) => (token.clone(), chat_id.clone()),
            _ => return Ok(()),
        };

        let (message_id, previous) = match &self.last_message {
            Some((id, previous)) => (*id, previous.clone()),
            None => return self.send(text).await,
        };

        let combined = format!("{}\n\n{}", previous, text);
        if combined.chars().count() > EDIT_CHAR_BUDGET {
            return self.send(text).await;
        }

        self.call(
            &format!("https://api.telegram.org/bot{}/editMessageText", token),
            json!({ "chat_id": chat_id, "message_id": message_id, "text": combined }),
        )
        .await?;
        self.last_message = Some((message_id, combined));
        Ok(())
    }

    async fn call(&self, url: &str, body: serde_json::Value) -> Result<ApiReply> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("Failed to send Telegram request")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to get Telegram response text")?;
        let reply: ApiReply = serde_json::from_str(&text).map_err(|_| {
            AgentError::ExternalApiError(format!("Telegram API error: {} - {}", status, text))
        })?;

        if !reply.ok {
            return Err(AgentError::ExternalApiError(format!(
                "Telegram API error: {}",
                reply.description.unwrap_or_else(|| status.to_string())
            ))
            .into());
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_notifier_is_a_silent_no_op() {
        let mut notifier = TelegramNotifier::from_env(false).unwrap();
        assert!(!notifier.is_enabled());
        notifier.send("hello").await.unwrap();
        notifier.append("world").await.unwrap();
        assert!(notifier.last_message.is_none());
    }
}
