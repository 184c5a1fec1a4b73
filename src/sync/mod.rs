use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::gmail::MailApi;
use crate::store::{StateStore, StoreError};

pub mod labels;
pub mod reply;

/// Mutable state of one responder run: the history cursor, the set of
/// threads already replied to, and the cached marker-label id. The cursor is
/// loaded from and written back to the store; the reply ledger lives only in
/// memory and starts empty on every process start.
pub struct SyncState {
    cursor: Option<String>,
    replied_threads: HashSet<String>,
    label_id: Option<String>,
}

impl SyncState {
    pub fn load(store: &StateStore) -> Result<Self, StoreError> {
        Ok(Self {
            cursor: store.history_id()?,
            replied_threads: HashSet::new(),
            label_id: None,
        })
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_replied(&self, thread_id: &str) -> bool {
        self.replied_threads.contains(thread_id)
    }

    /// Once marked, a thread stays marked for the rest of the process.
    pub fn mark_replied(&mut self, thread_id: &str) {
        self.replied_threads.insert(thread_id.to_string());
    }

    pub fn cached_label_id(&self) -> Option<&str> {
        self.label_id.as_deref()
    }

    pub(crate) fn cache_label_id(&mut self, label_id: String) {
        self.label_id = Some(label_id);
    }
}

/// Outcome of one reconciliation tick. Message-local failures are collected
/// here instead of aborting the tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub replies_sent: usize,
    pub threads_skipped: usize,
    pub errors: Vec<String>,
}

/// One reconciliation pass: capture the account's current history position,
/// drain the change history since the stored cursor, drive the reply
/// pipeline for every added message, then advance the cursor.
///
/// The cursor advances to the observed position even when individual
/// messages failed; otherwise the same backlog would be reprocessed on every
/// tick. Only a profile fetch failure (no position observed) or a history
/// listing failure other than cursor expiry aborts the tick with the cursor
/// unchanged.
pub async fn tick<A: MailApi>(
    state: &mut SyncState,
    api: &A,
    store: &StateStore,
) -> Result<TickReport> {
    let profile = api.get_profile().await.context("fetch gmail profile")?;
    let current_history_id = profile.history_id;
    let mut report = TickReport::default();

    match state.cursor.clone() {
        None => {
            info!(history_id = %current_history_id, "no stored cursor; capturing baseline");
        }
        Some(start) => {
            if let Err(error) = drain_history(&start, state, api, store, &mut report).await {
                if is_cursor_expired(&error) {
                    warn!(
                        start_history_id = %start,
                        "stored cursor rejected as expired; re-baselining"
                    );
                } else {
                    return Err(error.context("list gmail history"));
                }
            }
        }
    }

    state.cursor = Some(current_history_id.clone());
    store
        .set_history_id(&current_history_id)
        .context("persist history cursor")?;
    debug!(history_id = %current_history_id, "cursor advanced");

    Ok(report)
}

async fn drain_history<A: MailApi>(
    start_history_id: &str,
    state: &mut SyncState,
    api: &A,
    store: &StateStore,
    report: &mut TickReport,
) -> Result<()> {
    let mut page_token: Option<String> = None;

    loop {
        let list = api
            .list_history(start_history_id, page_token.as_deref())
            .await?;

        for record in list.history.unwrap_or_default() {
            for added in record.messages_added.unwrap_or_default() {
                match reply::handle_new_message(&added.message, state, api, store).await {
                    Ok(reply::Outcome::Replied) => report.replies_sent += 1,
                    Ok(reply::Outcome::AlreadyReplied) => report.threads_skipped += 1,
                    Err(error) => {
                        warn!(message_id = %added.message.id, "skipping message: {error:#}");
                        report
                            .errors
                            .push(format!("message {}: {error:#}", added.message.id));
                    }
                }
            }
        }

        page_token = list.next_page_token;
        if page_token.is_none() {
            return Ok(());
        }
    }
}

/// Gmail reports an expired startHistoryId as 404. Matching the status code
/// rather than "historyId" keeps request-URL text in error contexts from
/// turning every transport failure into a resync.
fn is_cursor_expired(error: &anyhow::Error) -> bool {
    format!("{error:#}").contains("status=404")
}
