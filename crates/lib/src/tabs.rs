//! Per-tab conversation state: activity flag, live connection handle, and a
//! bounded message history.
//!
//! Tabs are created lazily on first connection and never removed; the
//! connection handle is replaced on reconnect so the history and activity
//! flag survive page reloads.

use crate::gateway::Outbound;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Browser tab id: the unit of conversation isolation.
pub type TabId = u64;

/// Sender half of a tab's UI connection.
pub type Connection = mpsc::Sender<Outbound>;

/// Retained feed entries per tab; history is truncated from the oldest end.
pub const HISTORY_CAP: usize = 10;

struct TabState {
    active: bool,
    connection: Connection,
    messages: Vec<Outbound>,
    in_flight: bool,
}

/// In-memory store of per-tab state. Sole owner and writer of tab histories.
pub struct TabStore {
    inner: Arc<RwLock<HashMap<TabId, TabState>>>,
}

impl Default for TabStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TabStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a (re)connected tab, replacing any previous connection handle.
    /// Returns the activity flag and a history snapshot for replay.
    pub async fn connect(&self, tab_id: TabId, connection: Connection) -> (bool, Vec<Outbound>) {
        let mut g = self.inner.write().await;
        let state = g.entry(tab_id).or_insert_with(|| TabState {
            active: false,
            connection: connection.clone(),
            messages: Vec::new(),
            in_flight: false,
        });
        state.connection = connection;
        (state.active, state.messages.clone())
    }

    /// Merge a feed message into the tab's history.
    ///
    /// A trailing `thinking` placeholder is dropped first; then a message
    /// whose id matches an existing entry (scanned newest to oldest) replaces
    /// that entry in place, otherwise the message is appended. The history is
    /// truncated to the last [`HISTORY_CAP`] entries.
    pub async fn upsert(&self, tab_id: TabId, message: Outbound) {
        let mut g = self.inner.write().await;
        let Some(state) = g.get_mut(&tab_id) else {
            log::warn!("upsert for unknown tab {}", tab_id);
            return;
        };
        let messages = &mut state.messages;
        if messages.last().map(Outbound::is_thinking).unwrap_or(false) {
            messages.pop();
        }
        if let Some(id) = message.message_id().map(str::to_string) {
            if let Some(i) = messages
                .iter()
                .rposition(|m| m.message_id() == Some(id.as_str()))
            {
                messages[i] = message;
                return;
            }
        }
        messages.push(message);
        if messages.len() > HISTORY_CAP {
            let excess = messages.len() - HISTORY_CAP;
            messages.drain(..excess);
        }
    }

    pub async fn set_active(&self, tab_id: TabId, active: bool) {
        if let Some(state) = self.inner.write().await.get_mut(&tab_id) {
            state.active = active;
        }
    }

    /// Current connection handle for a tab, if one was ever registered.
    pub async fn connection(&self, tab_id: TabId) -> Option<Connection> {
        self.inner
            .read()
            .await
            .get(&tab_id)
            .map(|s| s.connection.clone())
    }

    /// Every tracked tab's connection (for process-wide signals).
    pub async fn connections(&self) -> Vec<(TabId, Connection)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, s.connection.clone()))
            .collect()
    }

    /// Claim the tab's request slot. Returns false when a question is already
    /// in flight (or the tab is unknown), in which case the caller must not
    /// dispatch.
    pub async fn begin_request(&self, tab_id: TabId) -> bool {
        let mut g = self.inner.write().await;
        match g.get_mut(&tab_id) {
            Some(state) if !state.in_flight => {
                state.in_flight = true;
                true
            }
            Some(_) => false,
            None => {
                log::warn!("request for unknown tab {}", tab_id);
                false
            }
        }
    }

    pub async fn end_request(&self, tab_id: TabId) {
        if let Some(state) = self.inner.write().await.get_mut(&tab_id) {
            state.in_flight = false;
        }
    }

    /// Snapshot of a tab's retained history.
    pub async fn messages(&self, tab_id: TabId) -> Vec<Outbound> {
        self.inner
            .read()
            .await
            .get(&tab_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_tab(tab_id: TabId) -> TabStore {
        let store = TabStore::new();
        let (tx, _rx) = mpsc::channel(8);
        store.connect(tab_id, tx).await;
        store
    }

    fn delta(id: &str, text: &str) -> Outbound {
        Outbound::answer(json!({
            "message": {"id": id, "content": {"parts": [text]}}
        }))
    }

    #[tokio::test]
    async fn history_never_exceeds_cap() {
        let store = store_with_tab(1).await;
        for i in 0..25 {
            store.upsert(1, Outbound::user(format!("u-{}", i), "q")).await;
        }
        let messages = store.messages(1).await;
        assert_eq!(messages.len(), HISTORY_CAP);
        // oldest entries were dropped
        assert_eq!(messages[0].message_id(), Some("u-15"));
        assert_eq!(messages[9].message_id(), Some("u-24"));
    }

    #[tokio::test]
    async fn trailing_placeholder_is_replaced() {
        let store = store_with_tab(1).await;
        store.upsert(1, Outbound::user("u-1", "q")).await;
        store.upsert(1, Outbound::thinking("m-1")).await;
        store.upsert(1, delta("m-2", "answer")).await;
        let messages = store.messages(1).await;
        assert_eq!(messages.len(), 2);
        assert!(!messages.iter().any(|m| m.is_thinking()));
        assert_eq!(messages[1].message_id(), Some("m-2"));
    }

    #[tokio::test]
    async fn matching_id_replaces_in_place() {
        let store = store_with_tab(1).await;
        store.upsert(1, Outbound::user("u-1", "q")).await;
        store.upsert(1, delta("m-1", "part")).await;
        store.upsert(1, Outbound::user("u-2", "q2")).await;
        store.upsert(1, delta("m-1", "partial answer, longer")).await;
        let messages = store.messages(1).await;
        assert_eq!(messages.len(), 3);
        // replaced entry kept its position between the two user echoes
        assert_eq!(messages[0].message_id(), Some("u-1"));
        assert_eq!(messages[1], delta("m-1", "partial answer, longer"));
        assert_eq!(messages[2].message_id(), Some("u-2"));
    }

    #[tokio::test]
    async fn unmatched_id_is_appended() {
        let store = store_with_tab(1).await;
        store.upsert(1, delta("m-1", "a")).await;
        store.upsert(1, delta("m-2", "b")).await;
        assert_eq!(store.messages(1).await.len(), 2);
    }

    #[tokio::test]
    async fn reconnect_keeps_history_and_flag() {
        let store = TabStore::new();
        let (tx1, _rx1) = mpsc::channel(8);
        store.connect(7, tx1).await;
        store.set_active(7, true).await;
        store.upsert(7, Outbound::user("u-1", "q")).await;

        let (tx2, _rx2) = mpsc::channel(8);
        let (active, history) = store.connect(7, tx2).await;
        assert!(active);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message_id(), Some("u-1"));
    }

    #[tokio::test]
    async fn request_slot_is_exclusive_per_tab() {
        let store = store_with_tab(1).await;
        let (tx, _rx) = mpsc::channel(8);
        store.connect(2, tx).await;

        assert!(store.begin_request(1).await);
        assert!(!store.begin_request(1).await);
        // other tabs are unaffected
        assert!(store.begin_request(2).await);
        store.end_request(1).await;
        assert!(store.begin_request(1).await);
    }

    #[tokio::test]
    async fn upsert_for_unknown_tab_is_a_noop() {
        let store = TabStore::new();
        store.upsert(99, Outbound::user("u", "q")).await;
        assert!(store.messages(99).await.is_empty());
    }
}
