//! Periodic wallet reward engine.
//!
//! Every cycle walks all posts, scores the activity that arrived since the
//! previous cycle and splits each post's reward between its author and the
//! contributors (upvoters and commenters). Rewards decay with post age:
//! the score is divided by the number of cycles the post has lived
//! through. A cycle ends with a datagram on the multicast group so
//! interested clients can refresh their wallet views.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::store::models::Post;
use crate::store::DataStore;

pub const WALLET_UPDATE_MESSAGE: &[u8] = b"WALLETS_UPDATED";

pub struct RewardIssuer {
    store: Arc<DataStore>,
    period: Duration,
    /// Author's share of each post reward, in [0, 1]. The rest is split
    /// evenly across the contributors.
    author_percentage: f64,
    multicast_addr: String,
    multicast_port: u16,
    last_update: DateTime<Utc>,
    /// Cycles each post has been scored in; the reward divisor.
    post_iterations: HashMap<Uuid, u32>,
    /// Lifetime comment counts, resolved lazily and cached across cycles.
    commenter_counts: HashMap<String, usize>,
}

/// Per-post activity newer than the previous cycle. Contributors are the
/// upvoters and commenters; downvoters affect the score but earn nothing.
struct PostActivity {
    contributors: BTreeSet<String>,
    reaction_score: i32,
    commenters: Vec<String>,
}

fn activity_since(post: &Post, since: DateTime<Utc>) -> PostActivity {
    let mut contributors = BTreeSet::new();
    let mut reaction_score = 0;
    for reaction in post.reactions.iter().filter(|r| r.timestamp > since) {
        reaction_score += reaction.value;
        if reaction.value > 0 {
            contributors.insert(reaction.author.clone());
        }
    }

    let commenters: Vec<String> = post
        .comments
        .iter()
        .filter(|c| c.timestamp > since)
        .map(|c| c.author.clone())
        .collect();
    contributors.extend(commenters.iter().cloned());

    PostActivity {
        contributors,
        reaction_score,
        commenters,
    }
}

impl RewardIssuer {
    pub fn new(store: Arc<DataStore>, config: &Config) -> Self {
        RewardIssuer {
            store,
            period: Duration::from_secs(config.rewards.period_secs),
            author_percentage: config.rewards.author_percentage,
            multicast_addr: config.multicast.addr.clone(),
            multicast_port: config.multicast.port,
            last_update: DateTime::UNIX_EPOCH,
            post_iterations: HashMap::new(),
            commenter_counts: HashMap::new(),
        }
    }

    /// ln(max(reactions, 0) + 1) + ln(comment score + 1), divided by the
    /// post's cycle count. Each comment contributes a logistic weight of
    /// its author's lifetime comment count, so prolific commenters see
    /// diminishing returns.
    fn post_reward(&mut self, post: &Post, activity: &PostActivity) -> f64 {
        let reaction_score = activity.reaction_score.max(0) as f64;

        let mut comment_score = 0.0;
        for commenter in &activity.commenters {
            let count = match self.commenter_counts.get(commenter) {
                Some(&count) => count,
                None => {
                    let count = self.store.user_comment_count(commenter);
                    self.commenter_counts.insert(commenter.clone(), count);
                    count
                }
            };
            comment_score += 2.0 / (1.0 + (-(count as f64) - 1.0).exp());
        }

        let iterations = self.post_iterations.get(&post.id).copied().unwrap_or(1);
        ((reaction_score + 1.0).ln() + (comment_score + 1.0).ln()) / iterations as f64
    }

    /// One scoring pass over every post in the store. Zero rewards leave
    /// no wallet transaction behind.
    pub fn run_cycle(&mut self) {
        for username in self.store.usernames() {
            let mut author_delta = 0.0;
            for post in self.store.user_posts(&username) {
                self.post_iterations.entry(post.id).or_insert(1);

                let activity = activity_since(&post, self.last_update);
                let reward = self.post_reward(&post, &activity);

                author_delta += reward * self.author_percentage;
                if reward > 0.0 && !activity.contributors.is_empty() {
                    let share = reward * (1.0 - self.author_percentage)
                        / activity.contributors.len() as f64;
                    for contributor in &activity.contributors {
                        self.store.update_wallet(contributor, share);
                    }
                }

                if let Some(count) = self.post_iterations.get_mut(&post.id) {
                    *count += 1;
                }
            }
            if author_delta > 0.0 {
                self.store.update_wallet(&username, author_delta);
            }
        }
        self.last_update = Utc::now();
    }

    /// Run cycles forever. Announcement failures are logged and skipped; a
    /// flaky network must not stop reward accrual.
    pub async fn run(mut self) {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Could not open reward announcement socket: {}", e);
                return;
            }
        };
        let target = format!("{}:{}", self.multicast_addr, self.multicast_port);

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick fires immediately

        loop {
            ticker.tick().await;
            self.run_cycle();
            debug!("Reward cycle complete");
            if let Err(e) = socket.send_to(WALLET_UPDATE_MESSAGE, &target).await {
                warn!("Failed to announce wallet updates on {}: {}", target, e);
            }
        }
    }
}
