//! In-process concurrent data store.
//!
//! Top-level entity maps are guarded by `RwLock` and hold `Arc`'d values;
//! mutable nested state (a post, a follower set, a wallet) carries its own
//! `Mutex`. Writers follow a two-phase discipline: clone the `Arc` out of
//! the map under the coarse lock, release it, then take the entity lock to
//! mutate. The coarse lock is never held across a nested mutation.

pub mod models;
pub mod snapshot;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use models::{Comment, Post, Reaction, User, Wallet};

/// Three-way outcome for store mutations, so callers can distinguish a
/// missing entity from a rejected operation. Expressed as data, not an
/// error: business logic must branch on it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Ok,
    NotFound,
    IllegalOperation,
}

type Guarded<T> = Arc<Mutex<T>>;

#[derive(Default)]
pub struct DataStore {
    users: RwLock<HashMap<String, User>>,
    /// token -> username; one entry per live login.
    sessions: RwLock<HashMap<String, String>>,
    posts: RwLock<HashMap<Uuid, Guarded<Post>>>,
    user_posts: RwLock<HashMap<String, Guarded<BTreeSet<Uuid>>>>,
    followers: RwLock<HashMap<String, Guarded<BTreeSet<String>>>>,
    wallets: RwLock<HashMap<String, Guarded<Wallet>>>,
}

/// Phase one of the two-phase protocol: fetch the entity's `Arc` under the
/// coarse read lock and release the lock before anyone touches the entity.
fn fetch<K, T>(map: &RwLock<HashMap<K, Guarded<T>>>, key: &K) -> Option<Guarded<T>>
where
    K: std::hash::Hash + Eq,
{
    map.read().expect("lock poisoned").get(key).cloned()
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- users & sessions ---

    /// Atomically inserts a new user if the username is free; `None` means
    /// the name is taken. The user's empty post-set, follower-set and
    /// wallet are created under the same write lock, so no reader ever
    /// observes a user record without its companion collections.
    pub fn register_user(
        &self,
        username: &str,
        tags: BTreeSet<String>,
        password_hash: String,
    ) -> Option<User> {
        let mut users = self.users.write().expect("lock poisoned");
        if users.contains_key(username) {
            return None;
        }
        let user = User::new(username, tags, password_hash);
        users.insert(username.to_string(), user.clone());

        self.user_posts
            .write()
            .expect("lock poisoned")
            .insert(username.to_string(), Arc::new(Mutex::new(BTreeSet::new())));
        self.followers
            .write()
            .expect("lock poisoned")
            .insert(username.to_string(), Arc::new(Mutex::new(BTreeSet::new())));
        self.wallets
            .write()
            .expect("lock poisoned")
            .insert(username.to_string(), Arc::new(Mutex::new(Wallet::default())));

        Some(user)
    }

    pub fn get_user(&self, username: &str) -> Option<User> {
        self.users
            .read()
            .expect("lock poisoned")
            .get(username)
            .cloned()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.users
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Users sharing at least one tag with `username`, excluding the user
    /// themselves.
    pub fn compatible_users(&self, username: &str) -> Vec<User> {
        let users = self.users.read().expect("lock poisoned");
        let Some(me) = users.get(username) else {
            return Vec::new();
        };
        users
            .values()
            .filter(|other| other.username != username && me.is_compatible_with(other))
            .cloned()
            .collect()
    }

    pub fn set_session(&self, username: &str, token: &str) {
        self.sessions
            .write()
            .expect("lock poisoned")
            .insert(token.to_string(), username.to_string());
    }

    pub fn session_user(&self, token: &str) -> Option<User> {
        let username = self
            .sessions
            .read()
            .expect("lock poisoned")
            .get(token)
            .cloned()?;
        self.get_user(&username)
    }

    /// Logout succeeds only when the token currently maps to the claimed
    /// username; a valid token presented under someone else's name is
    /// rejected and left alive.
    pub fn delete_session(&self, token: &str, claimed_username: &str) -> bool {
        let mut sessions = self.sessions.write().expect("lock poisoned");
        match sessions.get(token) {
            Some(username) if username == claimed_username => {
                sessions.remove(token);
                true
            }
            _ => false,
        }
    }

    // --- follow graph ---

    /// Returns false when `target` does not exist. Adding an existing
    /// follower again is a no-op.
    pub fn add_follower(&self, target: &str, follower: &str) -> bool {
        match fetch(&self.followers, &target.to_string()) {
            Some(set) => {
                set.lock()
                    .expect("lock poisoned")
                    .insert(follower.to_string());
                true
            }
            None => false,
        }
    }

    pub fn remove_follower(&self, target: &str, follower: &str) -> bool {
        match fetch(&self.followers, &target.to_string()) {
            Some(set) => {
                set.lock().expect("lock poisoned").remove(follower);
                true
            }
            None => false,
        }
    }

    pub fn followers_of(&self, username: &str) -> Vec<String> {
        match fetch(&self.followers, &username.to_string()) {
            Some(set) => set.lock().expect("lock poisoned").iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Derived, not stored: every user whose follower set contains
    /// `username` is someone `username` follows.
    pub fn following_of(&self, username: &str) -> Vec<String> {
        let followers = self.followers.read().expect("lock poisoned");
        let mut following = Vec::new();
        for (user, set) in followers.iter() {
            if set.lock().expect("lock poisoned").contains(username) {
                following.push(user.clone());
            }
        }
        following
    }

    // --- posts ---

    pub fn add_post(&self, post: Post) {
        let id = post.id;
        let author = post.author.clone();
        self.posts
            .write()
            .expect("lock poisoned")
            .insert(id, Arc::new(Mutex::new(post)));
        if let Some(set) = fetch(&self.user_posts, &author) {
            set.lock().expect("lock poisoned").insert(id);
        }
    }

    pub fn get_post(&self, id: Uuid) -> Option<Post> {
        let entry = fetch(&self.posts, &id)?;
        let post = entry.lock().expect("lock poisoned").clone();
        Some(post)
    }

    pub fn user_posts(&self, username: &str) -> Vec<Post> {
        let ids: Vec<Uuid> = match fetch(&self.user_posts, &username.to_string()) {
            Some(set) => set.lock().expect("lock poisoned").iter().copied().collect(),
            None => return Vec::new(),
        };
        ids.into_iter().filter_map(|id| self.get_post(id)).collect()
    }

    /// The union of posts authored by everyone `username` follows.
    pub fn user_feed(&self, username: &str) -> Vec<Post> {
        self.following_of(username)
            .iter()
            .flat_map(|followed| self.user_posts(followed))
            .collect()
    }

    /// Deletes a post on behalf of `requester`, then cascades to every
    /// rewin of it: repost chains never outlive their source.
    pub fn delete_post(&self, id: Uuid, requester: &str) -> OpStatus {
        let Some(entry) = fetch(&self.posts, &id) else {
            return OpStatus::NotFound;
        };
        let author = entry.lock().expect("lock poisoned").author.clone();
        if author != requester {
            return OpStatus::IllegalOperation;
        }

        self.remove_post_record(id, &author);
        self.delete_rewins_of(id);
        OpStatus::Ok
    }

    fn remove_post_record(&self, id: Uuid, author: &str) {
        self.posts.write().expect("lock poisoned").remove(&id);
        if let Some(set) = fetch(&self.user_posts, &author.to_string()) {
            set.lock().expect("lock poisoned").remove(&id);
        }
    }

    fn delete_rewins_of(&self, id: Uuid) {
        let rewins: Vec<(Uuid, String)> = {
            let posts = self.posts.read().expect("lock poisoned");
            posts
                .values()
                .filter_map(|entry| {
                    let post = entry.lock().expect("lock poisoned");
                    (post.original_post == Some(id)).then(|| (post.id, post.author.clone()))
                })
                .collect()
        };
        for (rewin_id, rewin_author) in rewins {
            self.remove_post_record(rewin_id, &rewin_author);
            // rewins are chain-flattened so this recursion normally stops
            // after one level, but a restored snapshot is not trusted
            self.delete_rewins_of(rewin_id);
        }
    }

    // --- reactions & comments ---

    /// Reacting is restricted to posts reachable from the actor's feed; a
    /// missing post and an out-of-feed post are both NOT_FOUND.
    pub fn add_reaction(&self, post_id: Uuid, reaction: Reaction) -> OpStatus {
        if !self.feed_contains(&reaction.author, post_id) {
            return OpStatus::NotFound;
        }
        let Some(entry) = fetch(&self.posts, &post_id) else {
            return OpStatus::NotFound;
        };
        if entry.lock().expect("lock poisoned").add_reaction(reaction) {
            OpStatus::Ok
        } else {
            OpStatus::IllegalOperation
        }
    }

    pub fn add_comment(&self, post_id: Uuid, comment: Comment) -> OpStatus {
        if !self.feed_contains(&comment.author, post_id) {
            return OpStatus::NotFound;
        }
        let Some(entry) = fetch(&self.posts, &post_id) else {
            return OpStatus::NotFound;
        };
        if entry.lock().expect("lock poisoned").add_comment(comment) {
            OpStatus::Ok
        } else {
            OpStatus::IllegalOperation
        }
    }

    fn feed_contains(&self, username: &str, post_id: Uuid) -> bool {
        self.following_of(username).iter().any(|followed| {
            match fetch(&self.user_posts, followed) {
                Some(set) => set.lock().expect("lock poisoned").contains(&post_id),
                None => false,
            }
        })
    }

    /// Total comments authored by `username` across all posts. Feeds the
    /// reward engine's diminishing-returns weighting.
    pub fn user_comment_count(&self, username: &str) -> usize {
        let posts = self.posts.read().expect("lock poisoned");
        posts
            .values()
            .map(|entry| {
                entry
                    .lock()
                    .expect("lock poisoned")
                    .comments
                    .iter()
                    .filter(|c| c.author == username)
                    .count()
            })
            .sum()
    }

    // --- wallets ---

    pub fn wallet(&self, username: &str) -> Option<Wallet> {
        let entry = fetch(&self.wallets, &username.to_string())?;
        let wallet = entry.lock().expect("lock poisoned").clone();
        Some(wallet)
    }

    pub fn update_wallet(&self, username: &str, delta: f64) -> bool {
        match fetch(&self.wallets, &username.to_string()) {
            Some(entry) => {
                entry.lock().expect("lock poisoned").credit(delta);
                true
            }
            None => false,
        }
    }
}
