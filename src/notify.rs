use crate::Error;

#[cfg(feature = "slack")]
pub use slack::SlackNotifier;

/// Display name the report is posted under.
pub const BOT_NAME: &str = "fisherman";

/// Emoji used as the bot's avatar.
pub const BOT_ICON: &str = ":older_man::skin-tone-4:";

/// Something that can deliver a text message to a named channel.
pub trait Notifier {
    fn send_message(&self, channel: &str, text: &str) -> Result<(), Error>;
}

#[cfg(feature = "slack")]
mod slack {
    use super::{Notifier, BOT_ICON, BOT_NAME};
    use crate::Error;
    use reqwest::blocking::Client;
    use serde_json::{json, Value};

    const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

    /// Posts messages through Slack's Web API with a bot token.
    pub struct SlackNotifier {
        client: Client,
        token: String,
    }

    impl SlackNotifier {
        #[must_use]
        pub fn new(token: impl Into<String>) -> Self {
            Self {
                client: Client::new(),
                token: token.into(),
            }
        }
    }

    /// Request body for `chat.postMessage`.
    pub(crate) fn message_payload(channel: &str, text: &str) -> Value {
        json!({
            "channel": channel,
            "text": text,
            "username": BOT_NAME,
            "icon_emoji": BOT_ICON,
        })
    }

    fn notify_error(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Error {
        Error::Notify(err.into())
    }

    impl Notifier for SlackNotifier {
        fn send_message(&self, channel: &str, text: &str) -> Result<(), Error> {
            let body: Value = self
                .client
                .post(POST_MESSAGE_URL)
                .bearer_auth(&self.token)
                .json(&message_payload(channel, text))
                .send()
                .and_then(reqwest::blocking::Response::error_for_status)
                .and_then(reqwest::blocking::Response::json)
                .map_err(notify_error)?;

            // Slack answers 200 with `ok: false` for API-level failures
            if body["ok"].as_bool() == Some(true) {
                Ok(())
            } else {
                let reason = body["error"].as_str().unwrap_or("unknown error");
                Err(notify_error(format!("chat.postMessage failed: {reason}")))
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_message_payload() {
            let payload = message_payload("#db-alerts", "Slowest Queries");
            assert_eq!(
                payload,
                json!({
                    "channel": "#db-alerts",
                    "text": "Slowest Queries",
                    "username": "fisherman",
                    "icon_emoji": ":older_man::skin-tone-4:",
                })
            );
        }
    }
}
