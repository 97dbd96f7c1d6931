use std::collections::BTreeMap;

use super::{parse_header_line, split_head_and_body, ProtocolError};

const VERSION: &str = "HTTP/1.1";

/// Known status codes and their fixed verbose text. Anything else on a
/// status line is a decoding error.
const STATUS_TEXT: &[(u16, &str)] = &[
    (200, "200 OK"),
    (201, "201 CREATED"),
    (204, "204 NO CONTENT"),
    (400, "400 BAD REQUEST"),
    (401, "401 UNAUTHORIZED"),
    (403, "403 FORBIDDEN"),
    (404, "404 NOT FOUND"),
    (405, "405 METHOD NOT SUPPORTED"),
    (500, "500 INTERNAL SERVER ERROR"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Response {
    pub fn new(code: u16) -> Self {
        Self::with_body(code, "")
    }

    pub fn with_body(code: u16, body: impl Into<String>) -> Self {
        let mut response = Response {
            code,
            headers: BTreeMap::new(),
            body: body.into(),
        };
        response.set_default_headers();
        response
    }

    /// Content headers are computed from the actual body, never trusted
    /// from input; the CORS trio is there so browser-based clients work.
    fn set_default_headers(&mut self) {
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.headers
            .insert("content-length".to_string(), self.body.len().to_string());
        self.headers
            .insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
        self.headers
            .insert("Access-Control-Allow-Methods".to_string(), "*".to_string());
        self.headers
            .insert("Access-Control-Allow-Headers".to_string(), "*".to_string());
    }

    pub fn encode(&self) -> String {
        let mut out = format!("{} {}\r\n", VERSION, self.verbose_code());
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.push_str("\r\n\r\n");
        out
    }

    pub fn parse(raw: &str) -> Result<Response, ProtocolError> {
        let (lines, body) = split_head_and_body(raw);

        let status_line = lines
            .first()
            .ok_or_else(|| ProtocolError::MalformedStatusLine(String::new()))?;
        let status_text = status_line
            .strip_prefix(VERSION)
            .and_then(|rest| rest.strip_prefix(' '))
            .ok_or_else(|| ProtocolError::MalformedStatusLine(status_line.to_string()))?;

        let status_text = status_text.to_uppercase();
        let code = STATUS_TEXT
            .iter()
            .find(|(_, text)| *text == status_text)
            .map(|(code, _)| *code)
            .ok_or(ProtocolError::UnknownStatus(status_text))?;

        let mut headers = BTreeMap::new();
        for line in &lines[1..] {
            let (name, value) = parse_header_line(line)?;
            headers.insert(name, value);
        }

        Ok(Response {
            code,
            headers,
            body,
        })
    }

    fn verbose_code(&self) -> &'static str {
        STATUS_TEXT
            .iter()
            .find(|(code, _)| *code == self.code)
            .map(|(_, text)| *text)
            // codes only come from the fixed table on the server side
            .unwrap_or("500 INTERNAL SERVER ERROR")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }
}
