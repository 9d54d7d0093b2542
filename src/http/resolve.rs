//! Request resolution: page redirects, registration/login, static files.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::file::{FileError, MappedFile};
use super::request::Request;
use super::response::StatusCode;
use crate::store::{CredentialCache, StoreSession};

pub const INDEX_PAGE: &str = "/index.html";
pub const REGISTER_PAGE: &str = "/register.html";
pub const LOGIN_PAGE: &str = "/login.html";
pub const WELCOME_PAGE: &str = "/welcome.html";
pub const REGISTER_ERROR_PAGE: &str = "/registerError.html";
pub const LOGIN_ERROR_PAGE: &str = "/loginError.html";

/// What a request resolved to.
#[derive(Debug)]
pub enum Outcome {
    File(MappedFile),
    NoResource,
    Forbidden,
    BadRequest,
    InternalError,
}

impl Outcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::File(_) => StatusCode::Ok,
            Outcome::NoResource => StatusCode::NotFound,
            Outcome::Forbidden => StatusCode::Forbidden,
            Outcome::BadRequest => StatusCode::BadRequest,
            Outcome::InternalError => StatusCode::InternalError,
        }
    }
}

/// Action selected by the first character of the last URL segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ShowRegister,
    ShowLogin,
    Register,
    Login,
    Static,
}

impl Action {
    pub fn of(url: &str) -> Self {
        let segment = url.rsplit('/').next().unwrap_or(url);
        match segment.as_bytes().first() {
            Some(b'0') => Action::ShowRegister,
            Some(b'1') => Action::ShowLogin,
            Some(b'2') => Action::Register,
            Some(b'3') => Action::Login,
            _ => Action::Static,
        }
    }
}

/// Splits a `user=<name>&passwd=<password>` form body. No URL-decoding.
pub fn parse_credentials(body: &str) -> Option<(&str, &str)> {
    let amp = body.find('&')?;
    let name = body.get(5..amp)?;
    let tail = &body[amp + 1..];
    let eq = tail.find('=')?;
    Some((name, &tail[eq + 1..]))
}

#[derive(Debug)]
pub struct Resolver {
    doc_root: PathBuf,
    cache: Arc<CredentialCache>,
}

impl Resolver {
    pub fn new(doc_root: impl Into<PathBuf>, cache: Arc<CredentialCache>) -> Self {
        Self {
            doc_root: doc_root.into(),
            cache,
        }
    }

    pub fn doc_root(&self) -> &Path {
        &self.doc_root
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Rewrites `request.url` for page and credential actions, then looks
    /// up the file it names under the document root.
    pub fn resolve(&self, request: &mut Request, session: &mut dyn StoreSession) -> Outcome {
        match Action::of(&request.url) {
            Action::ShowRegister => request.url = REGISTER_PAGE.to_string(),
            Action::ShowLogin => request.url = LOGIN_PAGE.to_string(),
            Action::Register => {
                request.url = self.register(&request.body, session).to_string();
            }
            Action::Login => request.url = self.login(&request.body).to_string(),
            Action::Static => {}
        }

        if request.url.split('/').any(|segment| segment == "..") {
            debug!(url = %request.url, "Rejected path traversal");
            return Outcome::BadRequest;
        }

        let mut path = OsString::from(self.doc_root.as_os_str());
        path.push(&request.url);
        match MappedFile::open(Path::new(&path)) {
            Ok(file) => Outcome::File(file),
            Err(FileError::NotFound) => Outcome::NoResource,
            Err(FileError::Forbidden) => Outcome::Forbidden,
            Err(FileError::Directory) => Outcome::BadRequest,
            Err(FileError::Map(e)) => {
                warn!(path = ?path, error = %e, "Failed to map file");
                Outcome::InternalError
            }
        }
    }

    fn register(&self, body: &str, session: &mut dyn StoreSession) -> &'static str {
        let Some((name, passwd)) = parse_credentials(body) else {
            return REGISTER_ERROR_PAGE;
        };
        match self.cache.register(session, name, passwd) {
            Ok(()) => {
                debug!(user = name, "Registered");
                LOGIN_PAGE
            }
            Err(e) => {
                debug!(user = name, error = %e, "Registration refused");
                REGISTER_ERROR_PAGE
            }
        }
    }

    fn login(&self, body: &str) -> &'static str {
        match parse_credentials(body) {
            Some((name, passwd)) if self.cache.verify(name, passwd) => WELCOME_PAGE,
            _ => LOGIN_ERROR_PAGE,
        }
    }
}
