//! User registration.
//!
//! Registration is not part of the wire route set; it is an out-of-band
//! service exposed at the library boundary (tests and any collaborator
//! transport go through it). Validates input, hashes the password and
//! defers the uniqueness check to the store.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::store::models::User;
use crate::store::DataStore;

pub const MAX_TAGS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("username must not be blank")]
    BlankUsername,

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("between 1 and {MAX_TAGS} tags are required")]
    TagCount,

    #[error("username is already taken")]
    UsernameTaken,

    #[error("failed to hash password: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

pub struct RegistrationService {
    store: Arc<DataStore>,
    bcrypt_cost: u32,
}

impl RegistrationService {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self::with_cost(store, bcrypt::DEFAULT_COST)
    }

    /// Lower-cost variant for tests, where the default work factor would
    /// dominate the run time.
    pub fn with_cost(store: Arc<DataStore>, bcrypt_cost: u32) -> Self {
        RegistrationService { store, bcrypt_cost }
    }

    /// Register a new user. Tags are lowercased before storage so
    /// compatibility matching is case-insensitive.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        tags: &[String],
    ) -> Result<User, RegistrationError> {
        if username.trim().is_empty() {
            return Err(RegistrationError::BlankUsername);
        }
        if password.is_empty() {
            return Err(RegistrationError::EmptyPassword);
        }
        if tags.is_empty() || tags.len() > MAX_TAGS {
            return Err(RegistrationError::TagCount);
        }

        let tags: BTreeSet<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        let hash = bcrypt::hash(password, self.bcrypt_cost)?;

        self.store
            .register_user(username, tags, hash)
            .map(|user| user.without_password())
            .ok_or(RegistrationError::UsernameTaken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4; // bcrypt minimum, keeps tests fast

    fn service() -> RegistrationService {
        RegistrationService::with_cost(Arc::new(DataStore::new()), TEST_COST)
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn registers_a_valid_user() {
        let service = service();
        let user = service
            .register("alice", "s3cret", &tags(&["Go", "RUST"]))
            .unwrap();
        assert_eq!(user.username, "alice");
        // transport copy carries no hash
        assert!(user.password_hash.is_none());
        // tags are lowercased
        assert!(user.tags.contains("go"));
        assert!(user.tags.contains("rust"));
    }

    #[test]
    fn stored_user_has_a_verifiable_hash() {
        let store = Arc::new(DataStore::new());
        let service = RegistrationService::with_cost(Arc::clone(&store), TEST_COST);
        service.register("alice", "s3cret", &tags(&["go"])).unwrap();

        let stored = store.get_user("alice").unwrap();
        let hash = stored.password_hash.unwrap();
        assert!(bcrypt::verify("s3cret", &hash).unwrap());
        assert!(!bcrypt::verify("wrong", &hash).unwrap());
    }

    #[test]
    fn rejects_blank_username_and_empty_password() {
        let service = service();
        assert!(matches!(
            service.register("  ", "pw", &tags(&["go"])),
            Err(RegistrationError::BlankUsername)
        ));
        assert!(matches!(
            service.register("alice", "", &tags(&["go"])),
            Err(RegistrationError::EmptyPassword)
        ));
    }

    #[test]
    fn rejects_bad_tag_counts() {
        let service = service();
        assert!(matches!(
            service.register("alice", "pw", &[]),
            Err(RegistrationError::TagCount)
        ));
        assert!(matches!(
            service.register("alice", "pw", &tags(&["a", "b", "c", "d", "e", "f"])),
            Err(RegistrationError::TagCount)
        ));
        assert!(service
            .register("alice", "pw", &tags(&["a", "b", "c", "d", "e"]))
            .is_ok());
    }

    #[test]
    fn rejects_a_taken_username() {
        let service = service();
        service.register("alice", "pw", &tags(&["go"])).unwrap();
        assert!(matches!(
            service.register("alice", "other", &tags(&["rust"])),
            Err(RegistrationError::UsernameTaken)
        ));
    }
}
