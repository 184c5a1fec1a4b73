use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod client;

pub use client::GmailClient;

/// The slice of the Gmail API the responder consumes. Everything network-bound
/// goes through this trait so the reconciliation engine can be driven by a
/// fake in tests.
#[async_trait(?Send)]
pub trait MailApi {
    async fn get_profile(&self) -> Result<Profile>;

    async fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryList>;

    async fn get_message(&self, message_id: &str) -> Result<Message>;

    async fn list_labels(&self) -> Result<Vec<Label>>;

    async fn create_label(&self, label: &Label) -> Result<Label>;

    async fn modify_thread(&self, thread_id: &str, add_label_ids: &[String]) -> Result<()>;

    async fn send_message(&self, raw: &str, thread_id: &str) -> Result<SentMessage>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(rename = "emailAddress")]
    pub email_address: String,
    #[serde(rename = "historyId")]
    pub history_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryList {
    pub history: Option<Vec<HistoryRecord>>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    #[serde(rename = "messagesAdded")]
    pub messages_added: Option<Vec<HistoryMessageAdded>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessageAdded {
    pub message: MessageRef,
}

/// Identifier pair for one message; `thread_id` is the dedup key.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub payload: MessagePayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePayload {
    pub headers: Option<Vec<MessageHeader>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(
        rename = "labelListVisibility",
        skip_serializing_if = "Option::is_none"
    )]
    pub label_list_visibility: Option<String>,
    #[serde(
        rename = "messageListVisibility",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_list_visibility: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
}

#[cfg(test)]
mod tests {
    use super::{HistoryList, Label, Message};

    #[test]
    fn history_list_decodes_gmail_shape() {
        let list: HistoryList = serde_json::from_str(
            r#"{
                "history": [
                    {
                        "id": "1001",
                        "messagesAdded": [
                            {"message": {"id": "m1", "threadId": "t1"}}
                        ]
                    },
                    {"id": "1002"}
                ],
                "historyId": "1003"
            }"#,
        )
        .expect("decode history list");

        let records = list.history.expect("history records present");
        assert_eq!(records.len(), 2);
        let added = records[0].messages_added.as_ref().expect("added events");
        assert_eq!(added[0].message.id, "m1");
        assert_eq!(added[0].message.thread_id, "t1");
        assert!(records[1].messages_added.is_none());
        assert_eq!(list.history_id.as_deref(), Some("1003"));
    }

    #[test]
    fn message_decodes_metadata_headers() {
        let message: Message = serde_json::from_str(
            r#"{
                "id": "m1",
                "threadId": "t1",
                "payload": {
                    "headers": [
                        {"name": "From", "value": "a@x.com"},
                        {"name": "Subject", "value": "Hi"}
                    ]
                }
            }"#,
        )
        .expect("decode message");

        assert_eq!(message.thread_id, "t1");
        assert_eq!(message.payload.headers.map(|h| h.len()), Some(2));
    }

    #[test]
    fn label_serializes_without_absent_fields() {
        let label = Label {
            id: None,
            name: "Replybot/Auto-Replied".to_string(),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
        };

        let value = serde_json::to_value(&label).expect("serialize label");
        assert!(value.get("id").is_none());
        assert_eq!(value["labelListVisibility"], "labelShow");
        assert_eq!(value["messageListVisibility"], "show");
    }
}
