//! Periodic data-store persistence.
//!
//! The whole store is serialized to a single JSON file on a fixed interval
//! and restored at startup. Sessions and notification callbacks are
//! transient and deliberately left out of the snapshot.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{Post, User, Wallet};
use super::DataStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    users: HashMap<String, User>,
    posts: Vec<Post>,
    user_posts: HashMap<String, BTreeSet<Uuid>>,
    followers: HashMap<String, BTreeSet<String>>,
    wallets: HashMap<String, Wallet>,
}

impl DataStore {
    /// Point-in-time copy of the persistent state. Entity locks are taken
    /// one at a time, so the snapshot is per-entity consistent.
    pub fn snapshot(&self) -> Snapshot {
        let users = self.users.read().expect("lock poisoned").clone();
        let posts = self
            .posts
            .read()
            .expect("lock poisoned")
            .values()
            .map(|entry| entry.lock().expect("lock poisoned").clone())
            .collect();
        let user_posts = self
            .user_posts
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().expect("lock poisoned").clone()))
            .collect();
        let followers = self
            .followers
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().expect("lock poisoned").clone()))
            .collect();
        let wallets = self
            .wallets
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().expect("lock poisoned").clone()))
            .collect();

        Snapshot {
            users,
            posts,
            user_posts,
            followers,
            wallets,
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> DataStore {
        let store = DataStore::new();
        *store.users.write().expect("lock poisoned") = snapshot.users;
        {
            let mut posts = store.posts.write().expect("lock poisoned");
            for post in snapshot.posts {
                posts.insert(post.id, Arc::new(Mutex::new(post)));
            }
        }
        *store.user_posts.write().expect("lock poisoned") = snapshot
            .user_posts
            .into_iter()
            .map(|(k, v)| (k, Arc::new(Mutex::new(v))))
            .collect();
        *store.followers.write().expect("lock poisoned") = snapshot
            .followers
            .into_iter()
            .map(|(k, v)| (k, Arc::new(Mutex::new(v))))
            .collect();
        *store.wallets.write().expect("lock poisoned") = snapshot
            .wallets
            .into_iter()
            .map(|(k, v)| (k, Arc::new(Mutex::new(v))))
            .collect();
        store
    }

    /// Restore the store from a snapshot file if one is present and valid,
    /// otherwise start empty. An unreadable snapshot is logged and skipped
    /// rather than taking the server down.
    pub fn restore_or_create(path: &Path) -> DataStore {
        if !path.exists() {
            tracing::info!("No snapshot at {}, starting empty", path.display());
            return DataStore::new();
        }
        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Ok(serde_json::from_str::<Snapshot>(&raw)?))
        {
            Ok(snapshot) => {
                let store = DataStore::from_snapshot(snapshot);
                tracing::info!(
                    "Restored {} users from {}",
                    store.usernames().len(),
                    path.display()
                );
                store
            }
            Err(e) => {
                tracing::warn!("Ignoring invalid snapshot {}: {}", path.display(), e);
                DataStore::new()
            }
        }
    }
}

/// Write the snapshot next to its final location and rename it into place,
/// so a crash mid-write never clobbers the previous snapshot.
pub fn save(snapshot: &Snapshot, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec(snapshot)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Background task persisting the store on a fixed interval. Failures are
/// logged and the next tick tries again.
pub async fn run_snapshot_task(store: Arc<DataStore>, path: PathBuf, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick of a tokio interval fires immediately; skip it
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snapshot = store.snapshot();
        if let Err(e) = save(&snapshot, &path) {
            tracing::error!("Failed to persist snapshot to {}: {}", path.display(), e);
        } else {
            tracing::debug!("Snapshot written to {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{Comment, Reaction};
    use crate::store::OpStatus;

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|t| t.to_string()).collect()
    }

    fn populated_store() -> (DataStore, Uuid) {
        let store = DataStore::new();
        store.register_user("alice", tags(&["go"]), "hash-a".into()).unwrap();
        store.register_user("bob", tags(&["go", "rust"]), "hash-b".into()).unwrap();
        store.add_follower("alice", "bob");

        let post = Post::new("alice", "hello", "world").unwrap();
        let post_id = post.id;
        store.add_post(post);
        assert_eq!(
            store.add_reaction(post_id, Reaction::new("bob", 1).unwrap()),
            OpStatus::Ok
        );
        assert_eq!(
            store.add_comment(post_id, Comment::new("bob", "nice").unwrap()),
            OpStatus::Ok
        );
        store.update_wallet("alice", 3.25);
        (store, post_id)
    }

    #[test]
    fn snapshot_round_trips_through_a_file() {
        let (store, post_id) = populated_store();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");

        save(&store.snapshot(), &path).unwrap();
        let restored = DataStore::restore_or_create(&path);

        let mut names = restored.usernames();
        names.sort();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
        // password hashes survive persistence
        assert_eq!(
            restored.get_user("alice").unwrap().password_hash.as_deref(),
            Some("hash-a")
        );
        assert_eq!(restored.followers_of("alice"), vec!["bob".to_string()]);

        let post = restored.get_post(post_id).unwrap();
        assert_eq!(post.reactions.len(), 1);
        assert_eq!(post.comments.len(), 1);
        assert_eq!(restored.user_posts("alice").len(), 1);
        assert!((restored.wallet("alice").unwrap().balance() - 3.25).abs() < 1e-9);
    }

    #[test]
    fn missing_snapshot_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DataStore::restore_or_create(&tmp.path().join("nope.json"));
        assert!(store.usernames().is_empty());
    }

    #[test]
    fn corrupt_snapshot_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = DataStore::restore_or_create(&path);
        assert!(store.usernames().is_empty());
    }

    #[test]
    fn save_replaces_an_existing_snapshot() {
        let (store, _) = populated_store();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");

        save(&DataStore::new().snapshot(), &path).unwrap();
        save(&store.snapshot(), &path).unwrap();

        let restored = DataStore::restore_or_create(&path);
        assert_eq!(restored.usernames().len(), 2);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
