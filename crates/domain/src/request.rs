//! Immutable description of one CLI invocation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four CoAP request methods the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// PUT and POST carry a body; GET and DELETE never do.
    pub fn carries_payload(self) -> bool {
        matches!(self, Method::Put | Method::Post)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a request or observation needs, resolved up front.
///
/// Built once by the CLI after config layering and then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub content_format: u16,
    /// Request body.  Ignored for GET and DELETE.
    pub payload: Vec<u8>,
    /// Raw `<id>,<value>` option strings as typed by the user.
    pub options: Vec<String>,
    pub auth: Option<String>,
    /// Explicit observe request (`-o`).  The option encoder may still turn
    /// this on when an Observe=0 option is supplied by hand.
    pub observe: bool,
    pub verbose: bool,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            content_format: 50,
            payload: Vec::new(),
            options: Vec::new(),
            auth: None,
            observe: false,
            verbose: false,
        }
    }

    pub fn content_format(mut self, cf: u16) -> Self {
        self.content_format = cf;
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn options(mut self, options: impl Into<Vec<String>>) -> Self {
        self.options = options.into();
        self
    }

    pub fn auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(token.into());
        self
    }

    pub fn observe(mut self, observe: bool) -> Self {
        self.observe = observe;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_put_and_post_carry_payload() {
        assert!(Method::Put.carries_payload());
        assert!(Method::Post.carries_payload());
        assert!(!Method::Get.carries_payload());
        assert!(!Method::Delete.carries_payload());
    }

    #[test]
    fn request_builder_defaults() {
        let spec = RequestSpec::new(Method::Get, "/sensors/temp");
        assert_eq!(spec.content_format, 50);
        assert!(spec.payload.is_empty());
        assert!(!spec.observe);
        assert_eq!(spec.method.to_string(), "GET");
    }
}
