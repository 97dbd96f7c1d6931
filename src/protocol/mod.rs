//! Wire protocol codec.
//!
//! Requests and responses are plain text, CRLF-delimited: a request line
//! (`METHOD PATH`) or status line (`HTTP/1.1 STATUS-TEXT`), then zero or
//! more `Header: value` lines, a blank line, and the body. Decoding
//! failures are structured errors so the connection loop can answer 400
//! instead of tearing down the socket.

mod request;
mod response;

pub use request::Request;
pub use response::Response;

use std::fmt;
use std::str::FromStr;

pub const PATH_PARAM_TOKEN: &str = "<id>";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("unknown method: {0:?}")]
    UnknownMethod(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    #[error("unknown status: {0:?}")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        };
        f.write_str(name)
    }
}

/// Split a decoded message into (head lines, body). The head ends at the
/// first blank line; trailing CRLF padding on the body is dropped.
fn split_head_and_body(raw: &str) -> (Vec<&str>, String) {
    let (head, body) = match raw.split_once("\r\n\r\n") {
        Some((head, body)) => (head, body),
        None => (raw, ""),
    };
    let lines = head.split("\r\n").collect();
    let body = body.trim_end_matches("\r\n").to_string();
    (lines, body)
}

fn parse_header_line(line: &str) -> Result<(String, String), ProtocolError> {
    let (name, value) = line
        .split_once(": ")
        .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
    Ok((name.to_string(), value.to_string()))
}
