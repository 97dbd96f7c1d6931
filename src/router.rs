//! Route resolution.
//!
//! A static table maps placeholder-normalized path templates to handler
//! *names*; the server binds names to functions at startup. Resolution is
//! an exact match on the normalized path, then a lookup of the request
//! method within the matched route.

use crate::error::{ApiError, ApiResult};
use crate::protocol::{Method, Request};

pub struct Route {
    pub path: &'static str,
    pub handlers: &'static [(Method, &'static str)],
}

pub const ROUTES: &[Route] = &[
    Route {
        path: "/login",
        handlers: &[(Method::Post, "login")],
    },
    Route {
        path: "/logout",
        handlers: &[(Method::Post, "logout")],
    },
    Route {
        path: "/users",
        handlers: &[(Method::Get, "list_compatible_users")],
    },
    Route {
        path: "/users/following",
        handlers: &[
            (Method::Get, "list_following"),
            (Method::Put, "follow_user"),
            (Method::Delete, "unfollow_user"),
        ],
    },
    Route {
        path: "/posts",
        handlers: &[(Method::Get, "show_feed"), (Method::Post, "create_post")],
    },
    Route {
        path: "/posts/my-posts",
        handlers: &[(Method::Get, "list_my_posts")],
    },
    Route {
        path: "/posts/<id>",
        handlers: &[(Method::Get, "show_post"), (Method::Delete, "delete_post")],
    },
    Route {
        path: "/posts/<id>/rewin",
        handlers: &[(Method::Post, "rewin_post")],
    },
    Route {
        path: "/posts/<id>/rate",
        handlers: &[(Method::Post, "rate_post")],
    },
    Route {
        path: "/posts/<id>/comments",
        handlers: &[(Method::Post, "create_comment")],
    },
    Route {
        path: "/wallet",
        handlers: &[(Method::Get, "show_wallet")],
    },
    Route {
        path: "/wallet/btc",
        handlers: &[(Method::Get, "show_wallet_btc")],
    },
];

/// Look up the handler name for a request. `RouteNotFound` when no
/// template matches the normalized path; `MethodNotSupported` when the
/// path matches but has no binding for the method.
pub fn resolve(request: &Request) -> ApiResult<&'static str> {
    let route = ROUTES
        .iter()
        .find(|route| route.path == request.path)
        .ok_or(ApiError::RouteNotFound)?;
    route
        .handlers
        .iter()
        .find(|(method, _)| *method == request.method)
        .map(|(_, name)| *name)
        .ok_or(ApiError::MethodNotSupported)
}
