//! Follower-change push notifications.
//!
//! Only the contract lives here: a client subscribes a [`FollowerSink`]
//! under its session token and gets pushed the full follower list whenever
//! it changes. The transport behind a sink is a collaborator concern; a
//! delivery failure is non-fatal and simply drops the stale sink.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::DataStore;

/// Client-side push endpoint for follower-list updates.
#[async_trait]
pub trait FollowerSink: Send + Sync {
    async fn follower_list_changed(&self, followers: Vec<String>) -> anyhow::Result<()>;
}

pub struct NotificationService {
    store: Arc<DataStore>,
    sinks: RwLock<HashMap<String, Arc<dyn FollowerSink>>>,
}

impl NotificationService {
    pub fn new(store: Arc<DataStore>) -> Self {
        NotificationService {
            store,
            sinks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a sink for the user behind `token`. Returns false when the
    /// token does not belong to a live session.
    pub async fn subscribe(&self, token: &str, sink: Arc<dyn FollowerSink>) -> bool {
        let Some(user) = self.store.session_user(token) else {
            return false;
        };
        self.sinks.write().await.insert(user.username, sink);
        true
    }

    pub async fn unsubscribe(&self, username: &str) {
        self.sinks.write().await.remove(username);
    }

    /// Push the user's current follower set to their sink, if any. On a
    /// delivery error the sink reference is cleared; the next subscribe
    /// starts fresh.
    pub async fn notify(&self, username: &str) {
        let sink = self.sinks.read().await.get(username).cloned();
        let Some(sink) = sink else {
            return;
        };
        let followers = self.store.followers_of(username);
        if let Err(e) = sink.follower_list_changed(followers).await {
            tracing::warn!("Dropping stale follower sink for {}: {}", username, e);
            self.sinks.write().await.remove(username);
        }
    }
}
