use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, COOKIE, LOCATION, RETRY_AFTER, SET_COOKIE};
use reqwest::{Client, Method};
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

use crate::config::AuthConfig;
use crate::cookies::SessionCookies;
use crate::error::{AuthError, Result};

const RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

// ─── Body ─────────────────────────────────────────────────────────────────

/// Request payload. Content types are chosen by the caller via headers.
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

// ─── RawResponse ──────────────────────────────────────────────────────────

/// A fully read response, after its cookies went through the jar.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub url: Url,
    /// `Location`, resolved against `url`.
    pub location: Option<Url>,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }
}

/// Where a chain of redirects ended, and the URLs it passed through.
#[derive(Debug, Clone)]
pub struct Redirected {
    pub response: RawResponse,
    pub hops: Vec<Url>,
}

// ─── Transport ────────────────────────────────────────────────────────────

/// The HTTP session of one login flow.
///
/// Redirects are never followed by the client itself: every hop goes through
/// [`Transport::send`] so its `Set-Cookie` headers land in the jar before the
/// next request is made.
pub struct Transport {
    client: Client,
    cookies: SessionCookies,
    max_redirects: usize,
}

impl Transport {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        Self::with_cookies(config, SessionCookies::new())
    }

    pub fn with_cookies(config: &AuthConfig, mut cookies: SessionCookies) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout())
            .user_agent(config.idx.user_agent.clone())
            .build()
            .map_err(AuthError::Transient)?;
        if let Some(rp) = &config.relying_party {
            cookies.watch_primary(
                SessionCookies::authority(&rp.target_url),
                config.primary_cookie.clone(),
            );
        }
        Ok(Self {
            client,
            cookies,
            max_redirects: config.max_redirects,
        })
    }

    pub fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut SessionCookies {
        &mut self.cookies
    }

    pub fn into_cookies(self) -> SessionCookies {
        self.cookies
    }

    /// Send one request and read the whole response.
    ///
    /// HTTP 429 becomes [`AuthError::RateLimited`]; nothing is retried.
    pub async fn send(
        &mut self,
        method: Method,
        url: &Url,
        headers: &[(&str, String)],
        body: Body,
    ) -> Result<RawResponse> {
        let mut req = self.client.request(method.clone(), url.clone());
        for (name, value) in headers {
            req = req.header(*name, value.as_str());
        }
        if let Some(cookie) = self.cookies.header_for(url) {
            req = req.header(COOKIE, cookie);
        }
        req = match body {
            Body::Empty => req,
            Body::Json(value) => req.body(serde_json::to_vec(&value)?),
            Body::Form(pairs) => {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .finish();
                req.body(encoded)
            }
        };

        debug!(%method, host = url.host_str().unwrap_or_default(), path = url.path(), "request");
        let resp = req.send().await.map_err(AuthError::Transient)?;
        let status = resp.status().as_u16();

        let set_cookie: Vec<String> = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        self.cookies.ingest(url, set_cookie.iter().map(String::as_str));

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| url.join(loc).ok());

        if status == 429 {
            let retry_after = retry_after(resp.headers());
            warn!(path = url.path(), ?retry_after, "rate limited");
            return Err(AuthError::RateLimited { retry_after });
        }

        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(AuthError::Transient)?;
        debug!(status, path = url.path(), bytes = body.len(), "response");
        Ok(RawResponse {
            status,
            url: url.clone(),
            location,
            headers,
            body,
        })
    }

    pub async fn get(&mut self, url: &Url, headers: &[(&str, String)]) -> Result<RawResponse> {
        self.send(Method::GET, url, headers, Body::Empty).await
    }

    /// GET `url` and follow redirects until a non-redirect response.
    pub async fn get_following(
        &mut self,
        url: &Url,
        headers: &[(&str, String)],
    ) -> Result<Redirected> {
        let first = self.get(url, headers).await?;
        self.follow(first, headers).await
    }

    /// Follow `response`'s redirect chain with GETs, bounded by the
    /// configured limit.
    pub async fn follow(
        &mut self,
        mut response: RawResponse,
        headers: &[(&str, String)],
    ) -> Result<Redirected> {
        let mut hops = Vec::new();
        while response.is_redirect() {
            if hops.len() >= self.max_redirects {
                return Err(AuthError::UnexpectedStatus {
                    status: response.status,
                    url: format!("{} (more than {} redirects)", response.url, self.max_redirects),
                });
            }
            let Some(next) = response.location.clone() else {
                break;
            };
            hops.push(next.clone());
            response = self.get(&next, headers).await?;
        }
        Ok(Redirected { response, hops })
    }
}

/// `Retry-After` in seconds, else Okta's `X-Rate-Limit-Reset` epoch.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let reset = header_str(headers, RATE_LIMIT_RESET).and_then(|v| v.parse::<i64>().ok())?;
    let wait = reset - Utc::now().timestamp();
    Some(Duration::from_secs(wait.max(0) as u64))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_seconds() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(retry_after(&h), Some(Duration::from_secs(30)));
    }

    #[test]
    fn retry_after_from_reset_epoch() {
        let mut h = HeaderMap::new();
        let reset = (Utc::now().timestamp() + 120).to_string();
        h.insert(RATE_LIMIT_RESET, HeaderValue::from_str(&reset).unwrap());
        let wait = retry_after(&h).unwrap();
        assert!(wait <= Duration::from_secs(120) && wait >= Duration::from_secs(100));
    }

    #[test]
    fn reset_in_the_past_is_zero() {
        let mut h = HeaderMap::new();
        h.insert(RATE_LIMIT_RESET, HeaderValue::from_static("1000"));
        assert_eq!(retry_after(&h), Some(Duration::ZERO));
    }

    #[test]
    fn no_headers_no_hint() {
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    fn config_with_relying_party() -> AuthConfig {
        let rp = crate::config::RelyingPartyConfig::new(
            Url::parse("https://support.example.com/customer_center").unwrap(),
            Url::parse("https://support.example.com/login_with_sso.do").unwrap(),
        );
        AuthConfig::new(Url::parse("https://sso.example.edu").unwrap()).with_relying_party(rp)
    }

    #[test]
    fn primary_cookie_is_watched_on_the_relying_party_only() {
        let mut transport = Transport::new(&config_with_relying_party()).unwrap();
        let idp = Url::parse("https://sso.example.edu/idp/idx/introspect").unwrap();
        let rp = Url::parse("https://support.example.com/navpage.do").unwrap();
        let jar = transport.cookies_mut();
        jar.ingest(&idp, ["JSESSIONID=idp-1"]);
        jar.ingest(&idp, ["JSESSIONID=idp-2"]);
        assert!(!jar.primary_drifted());
        jar.ingest(&rp, ["JSESSIONID=rp-1"]);
        jar.ingest(&rp, ["JSESSIONID=rp-2"]);
        assert!(jar.primary_drifted());
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = AuthConfig::new(Url::parse("https://sso.example.edu").unwrap());
        config.request_timeout_secs = 5;
        let mut transport = Transport::new(&config).unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/idp/idx/introspect")).unwrap();
        let err = transport.get(&url, &[]).await.unwrap_err();
        assert!(matches!(err, AuthError::Transient(_)), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[test]
    fn redirect_needs_location() {
        let url = Url::parse("https://a.example/").unwrap();
        let resp = RawResponse {
            status: 302,
            url: url.clone(),
            location: None,
            headers: HeaderMap::new(),
            body: String::new(),
        };
        assert!(!resp.is_redirect());
        let resp = RawResponse {
            location: Some(url.join("/next").unwrap()),
            ..resp
        };
        assert!(resp.is_redirect());
    }
}
