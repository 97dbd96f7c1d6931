use std::collections::BTreeMap;

use uuid::Uuid;

use super::{parse_header_line, split_head_and_body, Method, ProtocolError, PATH_PARAM_TOKEN};

/// A parsed request. The path is stored in *routable* form: any segment
/// that is a valid UUID is replaced by `<id>` and the literal value lands
/// in `path_param`. At most one UUID parameter per path is supported; no
/// route in this protocol uses more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub path_param: Option<Uuid>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Request {
    pub fn new(method: Method, path: &str, body: impl Into<String>) -> Self {
        let (path, path_param) = normalize_path(path);
        Request {
            method,
            path,
            path_param,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Parse a request off the wire. Any shape problem comes back as a
    /// `ProtocolError` so the caller can answer 400 without dropping the
    /// connection.
    pub fn parse(raw: &str) -> Result<Request, ProtocolError> {
        let (lines, body) = split_head_and_body(raw);

        let request_line = lines
            .first()
            .ok_or_else(|| ProtocolError::MalformedRequestLine(String::new()))?;
        let mut tokens = request_line.split(' ');
        let (method, path) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(method), Some(path), None) => (method, path),
            _ => {
                return Err(ProtocolError::MalformedRequestLine(
                    request_line.to_string(),
                ))
            }
        };
        let method: Method = method.parse()?;

        let mut headers = BTreeMap::new();
        for line in &lines[1..] {
            let (name, value) = parse_header_line(line)?;
            headers.insert(name, value);
        }

        let (path, path_param) = normalize_path(path);
        Ok(Request {
            method,
            path,
            path_param,
            headers,
            body,
        })
    }

    /// Render the wire form. The literal UUID is substituted back in place
    /// of the `<id>` token.
    pub fn encode(&self) -> String {
        let path = match self.path_param {
            Some(id) => self.path.replace(PATH_PARAM_TOKEN, &id.to_string()),
            None => self.path.clone(),
        };
        let mut out = format!("{} {}\r\n", self.method, path);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.push_str("\r\n\r\n");
        out
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The login route is the only one served anonymously.
    pub fn is_login_request(&self) -> bool {
        self.path == "/login"
    }
}

/// Split a path on `/`, replacing a UUID segment with the symbolic `<id>`
/// token and extracting the literal value. Paths come back canonicalized
/// with a single leading slash.
fn normalize_path(raw: &str) -> (String, Option<Uuid>) {
    let mut param = None;
    let mut normalized = String::new();

    for segment in raw.trim_start_matches('/').split('/') {
        normalized.push('/');
        match Uuid::parse_str(segment) {
            Ok(id) => {
                param = Some(id);
                normalized.push_str(PATH_PARAM_TOKEN);
            }
            Err(_) => normalized.push_str(segment),
        }
    }

    (normalized, param)
}
