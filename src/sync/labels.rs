use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::gmail::{Label, MailApi};
use crate::store::{LabelRecord, StateStore};
use crate::sync::SyncState;

/// Well-known name of the marker label applied to replied threads.
pub const MARKER_LABEL_NAME: &str = "Replybot/Auto-Replied";

/// Resolves the marker label id: memory cache, then the durable record, then
/// a name match against the remote label list, then creation. The network is
/// touched at most once per process lifetime on the happy path; adopted and
/// created labels are both persisted so later process starts stop at the
/// durable record.
pub async fn ensure_label<A: MailApi>(
    state: &mut SyncState,
    api: &A,
    store: &StateStore,
) -> Result<String> {
    if let Some(id) = state.cached_label_id() {
        return Ok(id.to_string());
    }

    if let Some(record) = store.label_record().context("load marker label record")? {
        state.cache_label_id(record.id.clone());
        return Ok(record.id);
    }

    let remote_labels = api.list_labels().await.context("list gmail labels")?;
    if let Some(existing) = remote_labels
        .into_iter()
        .find(|label| label.name == MARKER_LABEL_NAME)
    {
        let id = existing
            .id
            .ok_or_else(|| anyhow!("remote label '{MARKER_LABEL_NAME}' has no id"))?;
        adopt(state, store, id.clone(), existing.name)?;
        return Ok(id);
    }

    let created = api
        .create_label(&Label {
            id: None,
            name: MARKER_LABEL_NAME.to_string(),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
        })
        .await
        .context("create marker label")?;
    let id = created
        .id
        .ok_or_else(|| anyhow!("create label response missing id"))?;
    info!(label_id = %id, "created marker label '{MARKER_LABEL_NAME}'");

    adopt(state, store, id.clone(), created.name)?;
    Ok(id)
}

fn adopt(state: &mut SyncState, store: &StateStore, id: String, name: String) -> Result<()> {
    let record = LabelRecord {
        id: id.clone(),
        name,
    };
    store
        .set_label_record(&record)
        .context("persist marker label record")?;
    state.cache_label_id(id);
    Ok(())
}
