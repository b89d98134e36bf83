//! Session configuration

use salvo_core::http::cookie::{self, Cookie};
use salvo_core::{Request, Response};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SessionError;
use crate::sid::{Alphabet, DEFAULT_ID_LENGTH, MIN_ID_LENGTH};

/// Default time between two GC sweeps
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Reads the candidate session ID from a request
pub type IdReader = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// Writes the chosen session ID to the response. The flag is true when the
/// ID was newly created (or regenerated) for this request.
pub type IdWriter = Arc<dyn Fn(&mut Response, &str, bool) + Send + Sync>;

/// Receives errors from background GC sweeps
pub type GcErrorHandler = Arc<dyn Fn(SessionError) + Send + Sync>;

/// SameSite cookie attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    /// Strict - cookie only sent for same-site requests
    Strict,
    /// Lax - cookie sent for same-site requests and top-level navigations
    Lax,
    /// None - cookie sent for all requests (requires Secure)
    None,
}

impl From<SameSite> for cookie::SameSite {
    fn from(value: SameSite) -> Self {
        match value {
            SameSite::Strict => cookie::SameSite::Strict,
            SameSite::Lax => cookie::SameSite::Lax,
            SameSite::None => cookie::SameSite::None,
        }
    }
}

/// Options for the session cookie
#[derive(Clone, Debug)]
pub struct CookieConfig {
    /// Name of the session cookie (default: "salvo_session")
    pub name: String,
    /// Cookie path (default: "/")
    pub path: String,
    /// Cookie domain (default: None - current domain only)
    pub domain: Option<String>,
    /// Max age in seconds (default: None - browser session cookie)
    pub max_age: Option<u64>,
    /// Secure flag for cookie (default: false)
    pub secure: bool,
    /// HttpOnly flag for cookie (default: true)
    pub http_only: bool,
    /// SameSite attribute for cookie (default: Lax)
    pub same_site: SameSite,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "salvo_session".to_string(),
            path: "/".to_string(),
            domain: None,
            max_age: None,
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

impl CookieConfig {
    /// Build the cookie carrying `sid`
    pub fn build(&self, sid: &str) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name.clone(), sid.to_string()))
            .path(self.path.clone())
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(self.same_site.into());

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(max_age) = self.max_age {
            builder = builder.max_age(cookie::time::Duration::seconds(max_age as i64));
        }
        builder.build()
    }
}

/// Configuration for the session middleware
#[derive(Clone)]
pub struct SessionConfig {
    /// Cookie options used by the default ID transport
    pub cookie: CookieConfig,

    /// Length of session IDs (default: 16, at least 3)
    pub id_length: usize,

    /// Characters used in session IDs (default: lowercase alphanumeric)
    pub id_alphabet: Alphabet,

    /// Time between GC sweeps (default: 5 minutes, at least 1 second)
    pub gc_interval: Duration,

    /// Whether to save unchanged sessions on every request (default: false).
    /// Unchanged sessions are only touched otherwise.
    pub resave: bool,

    /// Time limit for each store call made by the middleware (default: none).
    /// A load that runs out of time answers 422 Unprocessable Entity.
    pub store_timeout: Option<Duration>,

    /// Called with errors from background GC (default: drop them)
    pub on_gc_error: GcErrorHandler,

    /// Custom ID reader (default: read the session cookie)
    pub read_id: Option<IdReader>,

    /// Custom ID writer (default: set the session cookie for new IDs)
    pub write_id: Option<IdWriter>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie: CookieConfig::default(),
            id_length: DEFAULT_ID_LENGTH,
            id_alphabet: Alphabet::Lowercase,
            gc_interval: DEFAULT_GC_INTERVAL,
            resave: false,
            store_timeout: None,
            on_gc_error: Arc::new(|_: SessionError| {}),
            read_id: None,
            write_id: None,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cookie", &self.cookie)
            .field("id_length", &self.id_length)
            .field("id_alphabet", &self.id_alphabet)
            .field("gc_interval", &self.gc_interval)
            .field("resave", &self.resave)
            .field("store_timeout", &self.store_timeout)
            .field("read_id", &self.read_id.is_some())
            .field("write_id", &self.write_id.is_some())
            .finish()
    }
}

impl SessionConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cookie name (default: "salvo_session")
    pub fn with_cookie_name<S: Into<String>>(mut self, name: S) -> Self {
        self.cookie.name = name.into();
        self
    }

    /// Set the cookie path (default: "/")
    pub fn with_cookie_path<S: Into<String>>(mut self, path: S) -> Self {
        self.cookie.path = path.into();
        self
    }

    /// Set the cookie domain
    pub fn with_cookie_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.cookie.domain = Some(domain.into());
        self
    }

    /// Set the cookie max age in seconds.
    /// Pass None for session cookie (expires when browser closes)
    pub fn with_max_age(mut self, max_age: impl Into<Option<u64>>) -> Self {
        self.cookie.max_age = max_age.into();
        self
    }

    /// Set the HttpOnly flag (default: true)
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.cookie.http_only = http_only;
        self
    }

    /// Set the Secure flag (default: false)
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.cookie.secure = secure;
        self
    }

    /// Set the SameSite attribute (default: Lax)
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.cookie.same_site = same_site;
        self
    }

    /// Set the session ID length
    pub fn with_id_length(mut self, len: usize) -> Self {
        self.id_length = len;
        self
    }

    /// Set the session ID alphabet
    pub fn with_id_alphabet(mut self, alphabet: Alphabet) -> Self {
        self.id_alphabet = alphabet;
        self
    }

    /// Set the GC interval
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Set whether to save unchanged sessions (default: false)
    pub fn with_resave(mut self, resave: bool) -> Self {
        self.resave = resave;
        self
    }

    /// Set the time limit for each store call made by the middleware
    pub fn with_store_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.store_timeout = timeout.into();
        self
    }

    /// Set the handler for background GC errors
    pub fn with_gc_error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(SessionError) + Send + Sync + 'static,
    {
        self.on_gc_error = Arc::new(f);
        self
    }

    /// Read the session ID with a custom function instead of the cookie
    pub fn with_id_reader<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        self.read_id = Some(Arc::new(f));
        self
    }

    /// Write the session ID with a custom function instead of the cookie
    pub fn with_id_writer<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Response, &str, bool) + Send + Sync + 'static,
    {
        self.write_id = Some(Arc::new(f));
        self
    }

    /// Apply defaults to out-of-range values
    pub fn normalized(mut self) -> Self {
        self.id_length = normalize_id_length(self.id_length);
        self.gc_interval = normalize_gc_interval(self.gc_interval);
        self
    }

    /// ID reader in effect: the custom one, or the session cookie
    pub(crate) fn id_reader(&self) -> IdReader {
        if let Some(reader) = &self.read_id {
            return Arc::clone(reader);
        }
        let name = self.cookie.name.clone();
        Arc::new(move |req: &Request| req.cookie(&name).map(|c| c.value().to_string()))
    }

    /// ID writer in effect: the custom one, or a cookie set for new IDs
    pub(crate) fn id_writer(&self) -> IdWriter {
        if let Some(writer) = &self.write_id {
            return Arc::clone(writer);
        }
        let cookie = self.cookie.clone();
        Arc::new(move |res: &mut Response, sid: &str, created: bool| {
            if created {
                res.add_cookie(cookie.build(sid));
            }
        })
    }
}

/// IDs shorter than the minimum fall back to the default length
pub(crate) fn normalize_id_length(len: usize) -> usize {
    if len < MIN_ID_LENGTH {
        DEFAULT_ID_LENGTH
    } else {
        len
    }
}

/// Intervals under one second fall back to the default
pub(crate) fn normalize_gc_interval(interval: Duration) -> Duration {
    if interval < Duration::from_secs(1) {
        DEFAULT_GC_INTERVAL
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.cookie.name, "salvo_session");
        assert_eq!(config.id_length, 16);
        assert_eq!(config.gc_interval, Duration::from_secs(300));
        assert!(config.cookie.http_only);
        assert_eq!(config.cookie.same_site, SameSite::Lax);
        assert_eq!(config.store_timeout, None);
    }

    #[test]
    fn test_out_of_range_values_are_normalized() {
        let config = SessionConfig::new()
            .with_id_length(2)
            .with_gc_interval(Duration::from_millis(500))
            .normalized();
        assert_eq!(config.id_length, 16);
        assert_eq!(config.gc_interval, DEFAULT_GC_INTERVAL);

        let config = SessionConfig::new()
            .with_id_length(3)
            .with_gc_interval(Duration::from_secs(1))
            .normalized();
        assert_eq!(config.id_length, 3);
        assert_eq!(config.gc_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = SessionConfig::new()
            .with_cookie_name("sid")
            .with_cookie_domain("example.com")
            .with_max_age(60)
            .with_secure(true)
            .with_same_site(SameSite::Strict)
            .cookie
            .build("abc");

        assert_eq!(cookie.name(), "sid");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::seconds(60)));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(cookie::SameSite::Strict));
    }
}
