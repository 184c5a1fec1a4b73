use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::{debug, warn};

use crate::gmail::{MailApi, Message, MessageRef};
use crate::store::StateStore;
use crate::sync::{labels, SyncState};

/// Static body of every automated reply.
const REPLY_BODY_HTML: &str = "<p>Hello! This is an automated reply to let you \
     know your message arrived. A real reply will follow as soon as possible.</p>";

pub(crate) enum Outcome {
    Replied,
    AlreadyReplied,
}

/// Drives one added message through the reply pipeline. The ledger is marked
/// only after the send succeeds, so a failed send leaves the thread eligible
/// for the next message that arrives in it. Labeling failures never unwind
/// the sent reply or the ledger mark.
pub(crate) async fn handle_new_message<A: MailApi>(
    message_ref: &MessageRef,
    state: &mut SyncState,
    api: &A,
    store: &StateStore,
) -> Result<Outcome> {
    if state.has_replied(&message_ref.thread_id) {
        debug!(thread_id = %message_ref.thread_id, "thread already replied to; skipping");
        return Ok(Outcome::AlreadyReplied);
    }

    let message = api
        .get_message(&message_ref.id)
        .await
        .context("fetch message metadata")?;
    let headers = ReplyHeaders::from_message(&message);

    let raw = compose_reply(&headers);
    let sent = api
        .send_message(&raw, &message_ref.thread_id)
        .await
        .context("send reply")?;

    state.mark_replied(&message_ref.thread_id);
    debug!(thread_id = %sent.thread_id, "reply sent");

    match labels::ensure_label(state, api, store).await {
        Ok(label_id) => {
            if let Err(error) = api
                .modify_thread(&message_ref.thread_id, &[label_id])
                .await
            {
                warn!(
                    thread_id = %message_ref.thread_id,
                    "failed to label replied thread: {error:#}"
                );
            }
        }
        Err(error) => {
            warn!(
                thread_id = %message_ref.thread_id,
                "failed to provision marker label: {error:#}"
            );
        }
    }

    Ok(Outcome::Replied)
}

/// The header subset a reply is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyHeaders {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
}

impl ReplyHeaders {
    pub fn from_message(message: &Message) -> Self {
        Self {
            from: extract_header(message, "From"),
            to: extract_header(message, "To"),
            subject: extract_header(message, "Subject"),
            message_id: extract_header(message, "Message-ID"),
        }
    }
}

fn extract_header(message: &Message, name: &str) -> Option<String> {
    message
        .payload
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.clone())
}

/// Builds the base64url-encoded reply envelope. From/To are swapped relative
/// to the original so the reply goes back to the sender; absent headers
/// leave their line empty or omitted instead of failing composition.
/// Deterministic for identical headers.
pub fn compose_reply(headers: &ReplyHeaders) -> String {
    let mut lines = Vec::new();

    if let Some(original_to) = &headers.to {
        lines.push(format!("From: {original_to}"));
    }
    if let Some(original_from) = &headers.from {
        lines.push(format!("To: {original_from}"));
    }
    lines.push(format!(
        "Subject: Re: {}",
        headers.subject.as_deref().unwrap_or("")
    ));
    if let Some(message_id) = &headers.message_id {
        lines.push(format!("References: {message_id}"));
        lines.push(format!("In-Reply-To: {message_id}"));
    }
    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/html; charset=UTF-8".to_string());
    lines.push(String::new());
    lines.push(REPLY_BODY_HTML.to_string());

    URL_SAFE_NO_PAD.encode(lines.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    use crate::gmail::{Message, MessageHeader, MessagePayload};

    use super::{compose_reply, ReplyHeaders};

    fn decode(raw: &str) -> String {
        let bytes = URL_SAFE_NO_PAD.decode(raw).expect("decode base64url");
        String::from_utf8(bytes).expect("utf8 envelope")
    }

    fn metadata_message(headers: &[(&str, &str)]) -> Message {
        Message {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            payload: MessagePayload {
                headers: Some(
                    headers
                        .iter()
                        .map(|(name, value)| MessageHeader {
                            name: name.to_string(),
                            value: value.to_string(),
                        })
                        .collect(),
                ),
            },
        }
    }

    #[test]
    fn composed_reply_swaps_sender_and_recipient() {
        let headers = ReplyHeaders {
            from: Some("a@x.com".to_string()),
            to: Some("b@x.com".to_string()),
            subject: Some("Hi".to_string()),
            message_id: Some("<1>".to_string()),
        };

        let envelope = decode(&compose_reply(&headers));
        let lines: Vec<&str> = envelope.split("\r\n").collect();

        assert!(lines.contains(&"From: b@x.com"));
        assert!(lines.contains(&"To: a@x.com"));
        assert!(lines.contains(&"Subject: Re: Hi"));
        assert!(lines.contains(&"References: <1>"));
        assert!(lines.contains(&"In-Reply-To: <1>"));
        assert!(lines.contains(&"Content-Type: text/html; charset=UTF-8"));
    }

    #[test]
    fn composition_is_deterministic() {
        let headers = ReplyHeaders {
            from: Some("a@x.com".to_string()),
            to: Some("b@x.com".to_string()),
            subject: Some("Hi".to_string()),
            message_id: Some("<1>".to_string()),
        };

        assert_eq!(compose_reply(&headers), compose_reply(&headers));
    }

    #[test]
    fn absent_message_id_omits_threading_headers() {
        let headers = ReplyHeaders {
            from: Some("a@x.com".to_string()),
            to: Some("b@x.com".to_string()),
            subject: None,
            message_id: None,
        };

        let envelope = decode(&compose_reply(&headers));

        assert!(!envelope.contains("References:"));
        assert!(!envelope.contains("In-Reply-To:"));
        assert!(envelope.contains("Subject: Re: \r\n"));
    }

    #[test]
    fn headers_extract_case_insensitively() {
        let message = metadata_message(&[
            ("from", "a@x.com"),
            ("TO", "b@x.com"),
            ("Subject", "Hi"),
            ("Message-Id", "<1>"),
        ]);

        let headers = ReplyHeaders::from_message(&message);
        assert_eq!(headers.from.as_deref(), Some("a@x.com"));
        assert_eq!(headers.to.as_deref(), Some("b@x.com"));
        assert_eq!(headers.subject.as_deref(), Some("Hi"));
        assert_eq!(headers.message_id.as_deref(), Some("<1>"));
    }

    #[test]
    fn missing_header_block_yields_empty_headers() {
        let message = Message {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            payload: MessagePayload { headers: None },
        };

        assert_eq!(ReplyHeaders::from_message(&message), ReplyHeaders::default());
    }
}
