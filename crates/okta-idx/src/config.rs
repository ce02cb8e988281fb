use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

pub const DEFAULT_MEDIA_TYPE: &str = "application/ion+json; okta-version=1.0.0";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:145.0) Gecko/20100101 Firefox/145.0";
pub const DEFAULT_PRIMARY_COOKIE: &str = "JSESSIONID";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// IdxConfig
// ---------------------------------------------------------------------------

/// Content negotiation and client identification for `/idp/idx/*` calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdxConfig {
    #[serde(default = "default_media_type")]
    pub media_type: String,
    /// Sent as `X-Okta-User-Agent-Extended` when set.
    #[serde(default)]
    pub client_user_agent: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_media_type() -> String {
    DEFAULT_MEDIA_TYPE.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for IdxConfig {
    fn default() -> Self {
        Self {
            media_type: default_media_type(),
            client_user_agent: None,
            user_agent: default_user_agent(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthenticatorPreference
// ---------------------------------------------------------------------------

/// Which MFA authenticator to pick when the server offers several.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatorPreference {
    /// Authenticator key, e.g. `okta_verify`.
    #[serde(default)]
    pub key: Option<String>,
    /// Display label, e.g. `Okta Verify`. Checked when `key` does not match.
    #[serde(default)]
    pub label: Option<String>,
    /// Method type sent with the selection, e.g. `totp`.
    #[serde(default)]
    pub method_type: Option<String>,
}

impl AuthenticatorPreference {
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.label.is_none()
    }

    pub fn describe(&self) -> String {
        match (&self.key, &self.label) {
            (Some(k), Some(l)) => format!("key={k}, label={l}"),
            (Some(k), None) => format!("key={k}"),
            (None, Some(l)) => format!("label={l}"),
            (None, None) => "any".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// RelyingPartyConfig
// ---------------------------------------------------------------------------

/// The application that consumes the SAML assertion.
///
/// RelayState is decided when SSO is initiated, so the deep link the caller
/// wants to land on is `target_url`, visited before `sso_login_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingPartyConfig {
    pub target_url: Url,
    pub sso_login_url: Url,
    /// Cookie whose presence proves the relying party started a session.
    #[serde(default)]
    pub session_cookie: Option<String>,
    #[serde(default = "default_logout_markers")]
    pub logout_markers: Vec<String>,
    /// Response header on `target_url` that reports a live session.
    #[serde(default = "default_logged_in_header")]
    pub logged_in_header: String,
    #[serde(default = "default_logged_in_value")]
    pub logged_in_value: String,
}

fn default_logout_markers() -> Vec<String> {
    vec!["logout".to_string()]
}

fn default_logged_in_header() -> String {
    "x-is-logged-in".to_string()
}

fn default_logged_in_value() -> String {
    "true".to_string()
}

impl RelyingPartyConfig {
    pub fn new(target_url: Url, sso_login_url: Url) -> Self {
        Self {
            target_url,
            sso_login_url,
            session_cookie: None,
            logout_markers: default_logout_markers(),
            logged_in_header: default_logged_in_header(),
            logged_in_value: default_logged_in_value(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub idp_origin: Url,
    #[serde(default)]
    pub relying_party: Option<RelyingPartyConfig>,
    #[serde(default)]
    pub idx: IdxConfig,
    #[serde(default)]
    pub authenticator: AuthenticatorPreference,
    #[serde(default = "default_primary_cookie")]
    pub primary_cookie: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_flow_timeout")]
    pub flow_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_max_steps")]
    pub max_remediation_steps: usize,
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
}

fn default_primary_cookie() -> String {
    DEFAULT_PRIMARY_COOKIE.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_flow_timeout() -> u64 {
    300
}

fn default_max_redirects() -> usize {
    10
}

fn default_max_steps() -> usize {
    8
}

impl AuthConfig {
    pub fn new(idp_origin: Url) -> Self {
        Self {
            idp_origin,
            relying_party: None,
            idx: IdxConfig::default(),
            authenticator: AuthenticatorPreference::default(),
            primary_cookie: default_primary_cookie(),
            request_timeout_secs: default_request_timeout(),
            flow_timeout_secs: default_flow_timeout(),
            max_redirects: default_max_redirects(),
            max_remediation_steps: default_max_steps(),
            session_dir: None,
        }
    }

    pub fn with_relying_party(mut self, rp: RelyingPartyConfig) -> Self {
        self.relying_party = Some(rp);
        self
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: AuthConfig = serde_yaml::from_str(data)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }

    /// Scheme, host and port of the identity provider, as sent in `Origin`.
    pub fn idp_origin_header(&self) -> String {
        self.idp_origin
            .origin()
            .ascii_serialization()
    }

    /// Root URL of the identity provider, as sent in `Referer`.
    pub fn idp_root(&self) -> String {
        format!("{}/", self.idp_origin_header())
    }

    /// Directory for persisted session files.
    pub fn session_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.session_dir {
            return Ok(dir.clone());
        }
        let home = home::home_dir()
            .ok_or_else(|| AuthError::Config("home directory not found; set session_dir".into()))?;
        Ok(home.join(".config").join("okta-idx").join("sessions"))
    }

    /// Non-fatal problems worth surfacing before a login attempt.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.idp_origin.scheme() != "https" {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "idp_origin uses '{}'; credentials will not be protected in transit",
                    self.idp_origin.scheme()
                ),
            });
        }
        if self.request_timeout_secs == 0 || self.flow_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "timeouts must be greater than zero".to_string(),
            });
        }
        if self.flow_timeout_secs < self.request_timeout_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "flow_timeout_secs is shorter than a single request timeout".to_string(),
            });
        }
        if self.relying_party.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no relying_party configured; only token and login-page entry points work"
                    .to_string(),
            });
        }
        if self.authenticator.method_type.is_some() && self.authenticator.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "authenticator.method_type is set without a key or label".to_string(),
            });
        }
        warnings
    }

    fn check(&self) -> Result<()> {
        if let Some(err) = self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            return Err(AuthError::Config(err.message));
        }
        Ok(())
    }
}
