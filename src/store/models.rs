use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const MAX_TITLE_LEN: usize = 20;
pub const MAX_CONTENT_LEN: usize = 500;

/// A domain-level validation failure. Handlers map these to 400.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("title must be between 1 and {MAX_TITLE_LEN} characters")]
    Title,

    #[error("content must be between 1 and {MAX_CONTENT_LEN} characters")]
    Content,

    #[error("comment content must not be empty")]
    EmptyComment,

    #[error("reaction value must be +1 or -1")]
    ReactionValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub tags: BTreeSet<String>,
    /// bcrypt digest. Absent on instances serialized for transport.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password_hash: Option<String>,
}

impl User {
    pub fn new(username: &str, tags: BTreeSet<String>, password_hash: String) -> Self {
        User {
            username: username.to_string(),
            tags,
            password_hash: Some(password_hash),
        }
    }

    /// Copy of this user safe to put on the wire.
    pub fn without_password(&self) -> User {
        User {
            username: self.username.clone(),
            tags: self.tags.clone(),
            password_hash: None,
        }
    }

    /// Two users are compatible when they share at least one tag.
    pub fn is_compatible_with(&self, other: &User) -> bool {
        self.tags.intersection(&other.tags).next().is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    pub fn new(author: &str, content: &str) -> Result<Self, ValidationError> {
        if content.is_empty() {
            return Err(ValidationError::EmptyComment);
        }
        Ok(Comment {
            author: author.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub author: String,
    pub value: i32,
    pub timestamp: DateTime<Utc>,
}

impl Reaction {
    pub fn new(author: &str, value: i32) -> Result<Self, ValidationError> {
        if value != 1 && value != -1 {
            return Err(ValidationError::ReactionValue);
        }
        Ok(Reaction {
            author: author.to_string(),
            value,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub author: String,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub comments: Vec<Comment>,
    pub reactions: Vec<Reaction>,
    /// Set on rewins; always points at the root (non-rewin) post.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub original_post: Option<Uuid>,
}

impl Post {
    pub fn new(author: &str, title: &str, content: &str) -> Result<Self, ValidationError> {
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(ValidationError::Title);
        }
        if content.is_empty() || content.chars().count() > MAX_CONTENT_LEN {
            return Err(ValidationError::Content);
        }
        Ok(Post {
            id: Uuid::new_v4(),
            author: author.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            comments: Vec::new(),
            reactions: Vec::new(),
            original_post: None,
        })
    }

    /// Repost an existing post. Rewinning a rewin flattens the chain so the
    /// reference always lands on the root post.
    pub fn rewin(rewiner: &str, original: &Post) -> Post {
        Post {
            id: Uuid::new_v4(),
            author: rewiner.to_string(),
            title: String::new(),
            content: String::new(),
            timestamp: Utc::now(),
            comments: Vec::new(),
            reactions: Vec::new(),
            original_post: Some(original.original_post.unwrap_or(original.id)),
        }
    }

    pub fn is_rewin(&self) -> bool {
        self.original_post.is_some()
    }

    /// Rejects comments by the post's own author.
    pub fn add_comment(&mut self, comment: Comment) -> bool {
        if comment.author == self.author {
            return false;
        }
        self.comments.push(comment);
        true
    }

    /// Rejects self-reactions and second reactions by the same user; an
    /// existing reaction is never overwritten.
    pub fn add_reaction(&mut self, reaction: Reaction) -> bool {
        if reaction.author == self.author {
            return false;
        }
        if self.reactions.iter().any(|r| r.author == reaction.author) {
            return false;
        }
        self.reactions.push(reaction);
        true
    }

    pub fn upvote_count(&self) -> usize {
        self.reactions.iter().filter(|r| r.value == 1).count()
    }

    pub fn downvote_count(&self) -> usize {
        self.reactions.iter().filter(|r| r.value == -1).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletTransaction {
    pub delta: f64,
    pub timestamp: DateTime<Utc>,
}

/// Ordered list of signed credits; the balance is their sum. The system
/// itself only ever appends reward credits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub transactions: Vec<WalletTransaction>,
}

impl Wallet {
    pub fn balance(&self) -> f64 {
        self.transactions.iter().map(|t| t.delta).sum()
    }

    pub fn credit(&mut self, delta: f64) {
        self.transactions.push(WalletTransaction {
            delta,
            timestamp: Utc::now(),
        });
    }
}
