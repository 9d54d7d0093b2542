/// HTTP request methods accepted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    GET,
    POST,
}

impl Method {
    /// Parses a method token, ignoring ASCII case.
    ///
    /// # Example
    ///
    /// ```
    /// # use warden::http::request::Method;
    /// assert_eq!(Method::from_str("get"), Some(Method::GET));
    /// assert_eq!(Method::from_str("PUT"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("GET") {
            Some(Method::GET)
        } else if s.eq_ignore_ascii_case("POST") {
            Some(Method::POST)
        } else {
            None
        }
    }
}

/// Fields collected while parsing one request.
///
/// `url` starts as the normalized request target and may be rewritten while
/// the request is resolved (redirects, login/registration results).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub host: Option<String>,
    /// Declared `Content-Length`, 0 when absent.
    pub content_length: usize,
    /// Set by `Connection: keep-alive`.
    pub keep_alive: bool,
    pub body: String,
}

/// Builder for constructing Request objects.
#[derive(Debug, Default)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            request: Request {
                version: "HTTP/1.1".to_string(),
                ..Request::default()
            },
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.request.url = url.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.request.host = Some(host.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.request.keep_alive = keep_alive;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.request.content_length = body.len();
        self.request.body = body;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}
