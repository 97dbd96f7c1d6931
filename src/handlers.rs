//! Business logic, one async function per route.
//!
//! Handlers receive an [`AuthenticatedRequest`] and either produce a
//! response or raise a typed [`ApiError`]; the dispatch layer turns errors
//! into status codes. The name→function table mirrors the router's route
//! table: routes declare handler names, the server binds them here.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::{self, AuthenticatedRequest};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::notify::NotificationService;
use crate::protocol::Response;
use crate::rates::RateClient;
use crate::store::models::{Comment, Post, Reaction, User};
use crate::store::{DataStore, OpStatus};

/// Everything a handler may touch. Shared across connections and with the
/// background tasks.
pub struct AppContext {
    pub store: Arc<DataStore>,
    pub notifier: Arc<NotificationService>,
    pub rates: Arc<RateClient>,
    pub config: Config,
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ApiResult<Response>> + Send + 'a>>;
pub type Handler = for<'a> fn(&'a AppContext, AuthenticatedRequest) -> HandlerFuture<'a>;

/// Boxes an async handler behind the uniform [`Handler`] signature.
macro_rules! boxed {
    ($f:path) => {{
        fn wrap(ctx: &AppContext, req: AuthenticatedRequest) -> HandlerFuture<'_> {
            Box::pin($f(ctx, req))
        }
        wrap as Handler
    }};
}

/// Static dispatch table, built once at startup.
pub fn handler_table() -> HashMap<&'static str, Handler> {
    HashMap::from([
        ("login", boxed!(login)),
        ("logout", boxed!(logout)),
        ("list_compatible_users", boxed!(list_compatible_users)),
        ("list_following", boxed!(list_following)),
        ("follow_user", boxed!(follow_user)),
        ("unfollow_user", boxed!(unfollow_user)),
        ("show_feed", boxed!(show_feed)),
        ("create_post", boxed!(create_post)),
        ("list_my_posts", boxed!(list_my_posts)),
        ("show_post", boxed!(show_post)),
        ("delete_post", boxed!(delete_post)),
        ("rewin_post", boxed!(rewin_post)),
        ("rate_post", boxed!(rate_post)),
        ("create_comment", boxed!(create_comment)),
        ("show_wallet", boxed!(show_wallet)),
        ("show_wallet_btc", boxed!(show_wallet_btc)),
    ])
}

fn json<T: Serialize>(value: &T) -> ApiResult<String> {
    serde_json::to_string(value).map_err(|_| ApiError::InternalServerError)
}

fn path_param(req: &AuthenticatedRequest) -> ApiResult<uuid::Uuid> {
    req.request.path_param.ok_or(ApiError::BadRequest)
}

/// Body: username on the first line, password on the second. A successful
/// login answers with the fresh token plus the multicast rendezvous
/// address and port, one per line.
async fn login(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let mut lines = req.request.body.split('\n');
    let (Some(username), Some(password), None) = (lines.next(), lines.next(), lines.next())
    else {
        return Err(ApiError::BadRequest);
    };

    // an unknown user and a wrong password are indistinguishable on the wire
    let user = ctx
        .store
        .get_user(username)
        .ok_or(ApiError::PermissionDenied)?;
    let hash = user
        .password_hash
        .as_deref()
        .ok_or(ApiError::InternalServerError)?;
    if !bcrypt::verify(password, hash).map_err(|_| ApiError::InternalServerError)? {
        return Err(ApiError::PermissionDenied);
    }

    let token = auth::generate_token();
    ctx.store.set_session(&user.username, &token);
    tracing::info!("User {} logged in", user.username);

    let body = format!(
        "{}\n{}\n{}",
        token, ctx.config.multicast.addr, ctx.config.multicast.port
    );
    Ok(Response::with_body(200, body))
}

async fn logout(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let claimed_username = req.request.body.trim();
    let token = req
        .request
        .header("Authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::NoAuthenticationProvided)?;

    if ctx.store.delete_session(token, claimed_username) {
        ctx.notifier.unsubscribe(claimed_username).await;
        Ok(Response::new(204))
    } else {
        Err(ApiError::PermissionDenied)
    }
}

async fn list_compatible_users(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let users: Vec<User> = ctx
        .store
        .compatible_users(&me.username)
        .iter()
        .map(User::without_password)
        .collect();
    Ok(Response::with_body(200, json(&users)?))
}

async fn list_following(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let users: Vec<User> = ctx
        .store
        .following_of(&me.username)
        .iter()
        .filter_map(|name| ctx.store.get_user(name))
        .map(|user| user.without_password())
        .collect();
    Ok(Response::with_body(200, json(&users)?))
}

/// Body: the username to follow. Following yourself is rejected; a
/// successful change pushes the target's new follower list to their sink.
async fn follow_user(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?.username.clone();
    let target = req.request.body.trim().to_string();
    if target == me {
        return Err(ApiError::PermissionDenied);
    }
    if !ctx.store.add_follower(&target, &me) {
        return Err(ApiError::ResourceNotFound);
    }
    ctx.notifier.notify(&target).await;
    Ok(Response::new(204))
}

async fn unfollow_user(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?.username.clone();
    let target = req.request.body.trim().to_string();
    if !ctx.store.remove_follower(&target, &me) {
        return Err(ApiError::ResourceNotFound);
    }
    ctx.notifier.notify(&target).await;
    Ok(Response::new(204))
}

async fn show_feed(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let feed = ctx.store.user_feed(&me.username);
    Ok(Response::with_body(200, json(&feed)?))
}

async fn list_my_posts(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let posts = ctx.store.user_posts(&me.username);
    Ok(Response::with_body(200, json(&posts)?))
}

#[derive(Deserialize)]
struct CreatePostBody {
    title: String,
    content: String,
}

async fn create_post(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let body: CreatePostBody =
        serde_json::from_str(&req.request.body).map_err(|_| ApiError::BadRequest)?;
    let post =
        Post::new(&me.username, &body.title, &body.content).map_err(|_| ApiError::BadRequest)?;
    ctx.store.add_post(post.clone());
    Ok(Response::with_body(201, json(&post)?))
}

async fn show_post(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let id = path_param(&req)?;
    let post = ctx.store.get_post(id).ok_or(ApiError::ResourceNotFound)?;
    Ok(Response::with_body(200, json(&post)?))
}

async fn delete_post(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let id = path_param(&req)?;
    match ctx.store.delete_post(id, &me.username) {
        OpStatus::Ok => Ok(Response::new(204)),
        OpStatus::NotFound => Err(ApiError::ResourceNotFound),
        OpStatus::IllegalOperation => Err(ApiError::PermissionDenied),
    }
}

async fn rewin_post(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let id = path_param(&req)?;
    let original = ctx.store.get_post(id).ok_or(ApiError::ResourceNotFound)?;
    if original.author == me.username {
        return Err(ApiError::PermissionDenied);
    }
    let rewin = Post::rewin(&me.username, &original);
    ctx.store.add_post(rewin.clone());
    Ok(Response::with_body(200, json(&rewin)?))
}

#[derive(Deserialize)]
struct RateBody {
    value: i32,
}

async fn rate_post(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let id = path_param(&req)?;
    let body: RateBody =
        serde_json::from_str(&req.request.body).map_err(|_| ApiError::BadRequest)?;
    let reaction = Reaction::new(&me.username, body.value).map_err(|_| ApiError::BadRequest)?;
    match ctx.store.add_reaction(id, reaction) {
        OpStatus::Ok => Ok(Response::new(200)),
        OpStatus::NotFound => Err(ApiError::ResourceNotFound),
        OpStatus::IllegalOperation => Err(ApiError::PermissionDenied),
    }
}

#[derive(Deserialize)]
struct CommentBody {
    content: String,
}

async fn create_comment(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let id = path_param(&req)?;
    let body: CommentBody =
        serde_json::from_str(&req.request.body).map_err(|_| ApiError::BadRequest)?;
    let comment = Comment::new(&me.username, &body.content).map_err(|_| ApiError::BadRequest)?;
    match ctx.store.add_comment(id, comment.clone()) {
        OpStatus::Ok => Ok(Response::with_body(201, json(&comment)?)),
        OpStatus::NotFound => Err(ApiError::ResourceNotFound),
        OpStatus::IllegalOperation => Err(ApiError::PermissionDenied),
    }
}

async fn show_wallet(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let wallet = ctx
        .store
        .wallet(&me.username)
        .ok_or(ApiError::InternalServerError)?;
    let body = serde_json::json!({
        "balance": wallet.balance(),
        "transactions": wallet.transactions,
    });
    Ok(Response::with_body(200, body.to_string()))
}

/// Balance converted through the external rate service. A zero rate means
/// the dependency never produced a usable value.
async fn show_wallet_btc(ctx: &AppContext, req: AuthenticatedRequest) -> ApiResult<Response> {
    let me = req.user()?;
    let wallet = ctx
        .store
        .wallet(&me.username)
        .ok_or(ApiError::InternalServerError)?;
    let rate = ctx.rates.conversion_rate().await;
    if rate == 0.0 {
        return Err(ApiError::InternalServerError);
    }
    Ok(Response::with_body(200, (wallet.balance() * rate).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Method, Request};
    use crate::rates::RatePolicy;
    use crate::registration::RegistrationService;
    use std::time::Duration;

    fn test_ctx() -> AppContext {
        let store = Arc::new(DataStore::new());
        // unroutable rate endpoint with a fast policy: handlers fall back
        // to the cached rate of 1.0
        let rates = Arc::new(RateClient::with_policy(
            "http://127.0.0.1:9",
            RatePolicy {
                max_attempts: 1,
                retry_backoff: Duration::from_millis(1),
                breaker_cooldown: Duration::from_secs(60),
            },
        ));
        AppContext {
            notifier: Arc::new(NotificationService::new(Arc::clone(&store))),
            rates,
            config: Config::default(),
            store,
        }
    }

    fn register(ctx: &AppContext, username: &str) {
        RegistrationService::with_cost(Arc::clone(&ctx.store), 4)
            .register(username, "s3cret", &["go".to_string()])
            .unwrap();
    }

    fn authed(ctx: &AppContext, username: &str, request: Request) -> AuthenticatedRequest {
        AuthenticatedRequest {
            request,
            user: ctx.store.get_user(username),
        }
    }

    async fn login_token(ctx: &AppContext, username: &str) -> String {
        let request = Request::new(Method::Post, "/login", format!("{}\ns3cret", username));
        let response = login(ctx, auth::anonymous(request)).await.unwrap();
        response.body.split('\n').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn login_issues_a_token_and_rendezvous_info() {
        let ctx = test_ctx();
        register(&ctx, "alice");
        let request = Request::new(Method::Post, "/login", "alice\ns3cret");
        let response = login(&ctx, auth::anonymous(request)).await.unwrap();
        assert_eq!(response.code, 200);

        let lines: Vec<&str> = response.body.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 128);
        assert_eq!(lines[1], "239.255.32.32");
        assert_eq!(lines[2], "44444");
        // the token authenticates
        assert_eq!(ctx.store.session_user(lines[0]).unwrap().username, "alice");
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_and_unknown_user() {
        let ctx = test_ctx();
        register(&ctx, "alice");

        let request = Request::new(Method::Post, "/login", "alice\nwrong");
        assert!(matches!(
            login(&ctx, auth::anonymous(request)).await,
            Err(ApiError::PermissionDenied)
        ));

        let request = Request::new(Method::Post, "/login", "ghost\ns3cret");
        assert!(matches!(
            login(&ctx, auth::anonymous(request)).await,
            Err(ApiError::PermissionDenied)
        ));

        let request = Request::new(Method::Post, "/login", "just-one-line");
        assert!(matches!(
            login(&ctx, auth::anonymous(request)).await,
            Err(ApiError::BadRequest)
        ));
    }

    #[tokio::test]
    async fn logout_requires_the_matching_username() {
        let ctx = test_ctx();
        register(&ctx, "alice");
        let token = login_token(&ctx, "alice").await;

        let request = Request::new(Method::Post, "/logout", "mallory")
            .with_header("Authorization", &format!("Bearer {}", token));
        assert!(matches!(
            logout(&ctx, authed(&ctx, "alice", request)).await,
            Err(ApiError::PermissionDenied)
        ));
        assert!(ctx.store.session_user(&token).is_some());

        let request = Request::new(Method::Post, "/logout", "alice")
            .with_header("Authorization", &format!("Bearer {}", token));
        let response = logout(&ctx, authed(&ctx, "alice", request)).await.unwrap();
        assert_eq!(response.code, 204);
        assert!(ctx.store.session_user(&token).is_none());
    }

    #[tokio::test]
    async fn follow_rejects_self_and_unknown_targets() {
        let ctx = test_ctx();
        register(&ctx, "alice");
        register(&ctx, "bob");

        let request = Request::new(Method::Put, "/users/following", "alice");
        assert!(matches!(
            follow_user(&ctx, authed(&ctx, "alice", request)).await,
            Err(ApiError::PermissionDenied)
        ));

        let request = Request::new(Method::Put, "/users/following", "ghost");
        assert!(matches!(
            follow_user(&ctx, authed(&ctx, "alice", request)).await,
            Err(ApiError::ResourceNotFound)
        ));

        let request = Request::new(Method::Put, "/users/following", "bob");
        let response = follow_user(&ctx, authed(&ctx, "alice", request)).await.unwrap();
        assert_eq!(response.code, 204);
        assert_eq!(ctx.store.followers_of("bob"), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn create_show_and_delete_post() {
        let ctx = test_ctx();
        register(&ctx, "alice");

        let request = Request::new(
            Method::Post,
            "/posts",
            r#"{"title":"hello","content":"world"}"#,
        );
        let response = create_post(&ctx, authed(&ctx, "alice", request)).await.unwrap();
        assert_eq!(response.code, 201);
        let post: Post = serde_json::from_str(&response.body).unwrap();
        assert_eq!(post.author, "alice");

        let request = Request::new(Method::Get, &format!("/posts/{}", post.id), "");
        let response = show_post(&ctx, authed(&ctx, "alice", request)).await.unwrap();
        assert_eq!(response.code, 200);

        let request = Request::new(Method::Delete, &format!("/posts/{}", post.id), "");
        let response = delete_post(&ctx, authed(&ctx, "alice", request)).await.unwrap();
        assert_eq!(response.code, 204);
        assert!(ctx.store.get_post(post.id).is_none());
    }

    #[tokio::test]
    async fn oversized_post_body_is_bad_request() {
        let ctx = test_ctx();
        register(&ctx, "alice");
        let body = format!(r#"{{"title":"{}","content":"x"}}"#, "t".repeat(21));
        let request = Request::new(Method::Post, "/posts", body);
        assert!(matches!(
            create_post(&ctx, authed(&ctx, "alice", request)).await,
            Err(ApiError::BadRequest)
        ));
    }

    #[tokio::test]
    async fn rating_goes_through_the_feed_rules() {
        let ctx = test_ctx();
        register(&ctx, "alice");
        register(&ctx, "bob");
        ctx.store.add_follower("alice", "bob");
        let post = Post::new("alice", "hello", "world").unwrap();
        ctx.store.add_post(post.clone());

        let request = Request::new(
            Method::Post,
            &format!("/posts/{}/rate", post.id),
            r#"{"value":1}"#,
        );
        let response = rate_post(&ctx, authed(&ctx, "bob", request)).await.unwrap();
        assert_eq!(response.code, 200);

        // duplicate reaction
        let request = Request::new(
            Method::Post,
            &format!("/posts/{}/rate", post.id),
            r#"{"value":-1}"#,
        );
        assert!(matches!(
            rate_post(&ctx, authed(&ctx, "bob", request)).await,
            Err(ApiError::PermissionDenied)
        ));

        // invalid value
        let request = Request::new(
            Method::Post,
            &format!("/posts/{}/rate", post.id),
            r#"{"value":5}"#,
        );
        assert!(matches!(
            rate_post(&ctx, authed(&ctx, "bob", request)).await,
            Err(ApiError::BadRequest)
        ));
    }

    #[tokio::test]
    async fn wallet_and_btc_conversion() {
        let ctx = test_ctx();
        register(&ctx, "alice");
        ctx.store.update_wallet("alice", 2.5);

        let request = Request::new(Method::Get, "/wallet", "");
        let response = show_wallet(&ctx, authed(&ctx, "alice", request)).await.unwrap();
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["balance"], 2.5);
        assert_eq!(body["transactions"].as_array().unwrap().len(), 1);

        // rate endpoint is down, so the cached rate of 1.0 applies
        let request = Request::new(Method::Get, "/wallet/btc", "");
        let response = show_wallet_btc(&ctx, authed(&ctx, "alice", request)).await.unwrap();
        assert_eq!(response.body, "2.5");
    }

    #[test]
    fn every_route_has_a_bound_handler() {
        let table = handler_table();
        for route in crate::router::ROUTES {
            for (_, name) in route.handlers {
                assert!(table.contains_key(name), "unbound handler {}", name);
            }
        }
    }
}
