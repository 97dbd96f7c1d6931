/// Typed errors raised by the request pipeline. Each variant maps to a
/// fixed wire status code; the dispatch layer never lets anything else
/// reach a client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request")]
    BadRequest,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Resource not found")]
    ResourceNotFound,

    #[error("Method not supported")]
    MethodNotSupported,

    #[error("Route not found")]
    RouteNotFound,

    #[error("No authentication provided")]
    NoAuthenticationProvided,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Internal server error")]
    InternalServerError,
}

impl ApiError {
    /// Status code written back to the client for this error.
    ///
    /// Note the asymmetry: a missing Authorization header is 401, while a
    /// rejected token is 400. The two failure modes stay distinguishable.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest => 400,
            ApiError::PermissionDenied => 403,
            ApiError::ResourceNotFound => 404,
            ApiError::MethodNotSupported => 405,
            ApiError::RouteNotFound => 404,
            ApiError::NoAuthenticationProvided => 401,
            ApiError::InvalidToken => 400,
            ApiError::InternalServerError => 500,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
