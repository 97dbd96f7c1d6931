//! Bearer-token authentication gate.
//!
//! Sits between the router and the handlers: every route except login goes
//! through [`authenticate`], and downstream code never touches raw headers
//! again.

use rand::Rng;

use crate::error::{ApiError, ApiResult};
use crate::protocol::Request;
use crate::store::models::User;
use crate::store::DataStore;

const TOKEN_LENGTH: usize = 128;
const TOKEN_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// High-entropy session token, generated fresh per login. Uniqueness is
/// cryptographically assumed, not enforced.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// A request paired with the user it was resolved to. `user` is `None`
/// only for the anonymous login path.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    pub request: Request,
    pub user: Option<User>,
}

impl AuthenticatedRequest {
    /// The resolved user, for handlers on authenticated routes.
    pub fn user(&self) -> ApiResult<&User> {
        self.user.as_ref().ok_or(ApiError::InternalServerError)
    }
}

/// Pass-through for the login route.
pub fn anonymous(request: Request) -> AuthenticatedRequest {
    AuthenticatedRequest {
        request,
        user: None,
    }
}

/// Resolve the `Authorization: Bearer <token>` header against live
/// sessions. A missing header and a rejected token are distinct failures
/// (401 vs 400).
pub fn authenticate(store: &DataStore, request: Request) -> ApiResult<AuthenticatedRequest> {
    let header = request
        .header("Authorization")
        .ok_or(ApiError::NoAuthenticationProvided)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::InvalidToken)?;
    let user = store
        .session_user(token)
        .ok_or(ApiError::InvalidToken)?;

    Ok(AuthenticatedRequest {
        request,
        user: Some(user),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Method;
    use std::collections::BTreeSet;

    fn store_with_session() -> DataStore {
        let store = DataStore::new();
        let tags: BTreeSet<String> = ["go".to_string()].into();
        store.register_user("alice", tags, "hash".into()).unwrap();
        store.set_session("alice", "valid-token");
        store
    }

    #[test]
    fn generated_tokens_are_128_alphanumeric_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 128);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn missing_header_is_no_authentication() {
        let store = store_with_session();
        let request = Request::new(Method::Get, "/wallet", "");
        assert!(matches!(
            authenticate(&store, request),
            Err(ApiError::NoAuthenticationProvided)
        ));
    }

    #[test]
    fn missing_bearer_prefix_is_invalid_token() {
        let store = store_with_session();
        let request = Request::new(Method::Get, "/wallet", "").with_header("Authorization", "valid-token");
        assert!(matches!(
            authenticate(&store, request),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn unknown_token_is_invalid_token() {
        let store = store_with_session();
        let request =
            Request::new(Method::Get, "/wallet", "").with_header("Authorization", "Bearer nope");
        assert!(matches!(
            authenticate(&store, request),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn valid_token_resolves_the_user() {
        let store = store_with_session();
        let request = Request::new(Method::Get, "/wallet", "")
            .with_header("Authorization", "Bearer valid-token");
        let authed = authenticate(&store, request).unwrap();
        assert_eq!(authed.user().unwrap().username, "alice");
    }

    #[test]
    fn anonymous_request_has_no_user() {
        let request = Request::new(Method::Post, "/login", "alice\npw");
        let authed = anonymous(request);
        assert!(authed.user.is_none());
        assert!(authed.user().is_err());
    }
}
