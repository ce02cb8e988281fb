use std::collections::BTreeMap;

use cookie::time::{Duration, OffsetDateTime};
use cookie::Cookie;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

// ─── CookieDrift ──────────────────────────────────────────────────────────

/// The watched session cookie changed value after it was first set.
///
/// A relying party that binds its SAML request to the session cookie will
/// reject an otherwise valid assertion once this happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDrift {
    pub authority: String,
    pub name: String,
    pub previous: String,
    /// `None` when the server cleared the cookie.
    pub current: Option<String>,
}

// ─── SessionCookies ───────────────────────────────────────────────────────

/// The cookies a login flow has to carry, per server authority.
///
/// Every cookie a server sets is sent back to that server on each later
/// request, whether or not its purpose is known. Cookies are dropped only
/// when the server clears them (expiry in the past or `Max-Age` <= 0), and
/// the whole jar is dropped when the flow ends.
///
/// Cookies are keyed by the authority (`host[:port]`) of the response that
/// set them. `Domain` and `Path` attributes are not interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCookies {
    jars: BTreeMap<String, BTreeMap<String, String>>,
    /// `(authority, name)` of the relying party's session cookie.
    #[serde(skip)]
    watched: Option<(String, String)>,
    #[serde(skip)]
    drift: Vec<CookieDrift>,
}

impl SessionCookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `name` on `authority` as the primary session cookie and flag
    /// any value change. The same name on other servers is not watched.
    pub fn watch_primary(&mut self, authority: impl Into<String>, name: impl Into<String>) {
        self.watched = Some((authority.into(), name.into()));
    }

    /// `host` or `host:port` for `url`, the key cookies are stored under.
    pub fn authority(url: &Url) -> String {
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Record every `Set-Cookie` header of a response from `url`.
    pub fn ingest<'a>(&mut self, url: &Url, set_cookie: impl IntoIterator<Item = &'a str>) {
        self.ingest_at(url, set_cookie, OffsetDateTime::now_utc());
    }

    pub(crate) fn ingest_at<'a>(
        &mut self,
        url: &Url,
        set_cookie: impl IntoIterator<Item = &'a str>,
        now: OffsetDateTime,
    ) {
        let authority = Self::authority(url);
        for header in set_cookie {
            match Cookie::parse(header) {
                Ok(cookie) => self.apply(&authority, &cookie, now),
                Err(e) => debug!(%authority, error = %e, "ignoring unparseable Set-Cookie"),
            }
        }
    }

    fn apply(&mut self, authority: &str, cookie: &Cookie<'_>, now: OffsetDateTime) {
        let name = cookie.name();
        let cleared = is_clearing(cookie, now);
        let jar = self.jars.entry(authority.to_string()).or_default();
        let previous = if cleared {
            jar.remove(name)
        } else {
            jar.insert(name.to_string(), cookie.value().to_string())
        };
        debug!(%authority, cookie = name, cleared, "cookie updated");

        let watched = self
            .watched
            .as_ref()
            .is_some_and(|(a, n)| a == authority && n == name);
        if !watched {
            return;
        }
        let current = (!cleared).then(|| cookie.value().to_string());
        if let Some(previous) = previous {
            if current.as_deref() != Some(previous.as_str()) {
                warn!(
                    %authority,
                    cookie = name,
                    previous = %prefix(&previous),
                    current = %current.as_deref().map(prefix).unwrap_or("<cleared>"),
                    "primary session cookie changed mid-flow"
                );
                self.drift.push(CookieDrift {
                    authority: authority.to_string(),
                    name: name.to_string(),
                    previous,
                    current,
                });
            }
        }
    }

    /// Seed a cookie, e.g. from a persisted session.
    pub fn insert(&mut self, authority: &str, name: &str, value: &str) {
        self.jars
            .entry(authority.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, authority: &str, name: &str) -> Option<&str> {
        self.jars.get(authority)?.get(name).map(String::as_str)
    }

    /// `Cookie` header for a request to `url`, or `None` if nothing is held.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let jar = self.jars.get(&Self::authority(url))?;
        if jar.is_empty() {
            return None;
        }
        let pairs: Vec<String> = jar.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Some(pairs.join("; "))
    }

    pub fn names(&self, authority: &str) -> Vec<&str> {
        self.jars
            .get(authority)
            .map(|jar| jar.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn authorities(&self) -> impl Iterator<Item = &str> {
        self.jars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jars.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drift(&self) -> &[CookieDrift] {
        &self.drift
    }

    pub fn primary_drifted(&self) -> bool {
        !self.drift.is_empty()
    }

    /// Forget everything. Called when a flow fails or ends.
    pub fn clear(&mut self) {
        self.jars.clear();
        self.drift.clear();
    }
}

fn is_clearing(cookie: &Cookie<'_>, now: OffsetDateTime) -> bool {
    if cookie.max_age().is_some_and(|age| age <= Duration::ZERO) {
        return true;
    }
    cookie.expires_datetime().is_some_and(|at| at <= now)
}

fn prefix(value: &str) -> &str {
    match value.char_indices().nth(12) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
