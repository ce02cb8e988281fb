use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not find {pattern} in response: {snippet:?}")]
    Parse { pattern: String, snippet: String },

    #[error("identity provider error (HTTP {status}): {message} [{i18n_key}]")]
    Protocol {
        message: String,
        i18n_key: String,
        status: u16,
    },

    #[error("rate limited by identity provider{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Transient(#[source] reqwest::Error),

    #[error("login blocked: {0}")]
    Blocked(BlockReason),

    #[error("SAML handoff rejected ({hint}): {detail}")]
    HandoffRejected { hint: HandoffHint, detail: String },

    #[error("unexpected HTTP {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("login timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl AuthError {
    /// Build a `Parse` error carrying a short, single-line excerpt of `input`.
    pub fn parse(pattern: impl Into<String>, input: &str) -> Self {
        AuthError::Parse {
            pattern: pattern.into(),
            snippet: snippet(input, 120),
        }
    }

    /// Whether the caller may retry the whole attempt (after backing off).
    ///
    /// The library itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Transient(_) | AuthError::RateLimited { .. })
    }

    /// Text suitable for showing to the person logging in.
    ///
    /// Identity-provider messages are already human readable and pass through
    /// verbatim. Parse and handoff failures are translated into guidance,
    /// since their raw content is implementation detail.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Protocol { message, .. } => message.clone(),
            AuthError::Parse { .. } => "Unable to parse the login page; the identity provider's \
                 page format may have changed."
                .to_string(),
            AuthError::RateLimited { retry_after } => format!(
                "Too many login attempts. Wait{} before trying again; repeated attempts may lock the account.",
                retry_after
                    .map(|d| format!(" {}s", d.as_secs()))
                    .unwrap_or_default()
            ),
            AuthError::Transient(_) => {
                "Could not reach the identity provider. Check the network and try again.".to_string()
            }
            AuthError::Blocked(reason) => reason.to_string(),
            AuthError::HandoffRejected { hint, .. } => hint.guidance().to_string(),
            AuthError::Timeout(_) => {
                "Login took too long and was abandoned. Start again from the beginning.".to_string()
            }
            other => other.to_string(),
        }
    }
}

// ─── BlockReason ──────────────────────────────────────────────────────────

/// A remediation state that is not an error but still prevents completing
/// the login without the user doing something elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The server demands a password change before continuing.
    PasswordChangeRequired,
    /// The server wants a new authenticator enrolled (step name attached).
    EnrollmentRequired(String),
    /// None of the offered authenticators match the configured preference.
    NoUsableAuthenticator(String),
    /// A remediation step this client does not know how to handle.
    UnknownStep(String),
    /// The server kept asking for more steps than the configured limit.
    StepLimitExceeded(usize),
    /// Authentication finished its steps without a success link.
    NoSuccess,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::PasswordChangeRequired => {
                write!(f, "password change required; change it in a browser and log in again")
            }
            BlockReason::EnrollmentRequired(step) => write!(
                f,
                "authenticator enrollment required ({step}); enroll in a browser and log in again"
            ),
            BlockReason::NoUsableAuthenticator(wanted) => write!(
                f,
                "no offered authenticator matches the configured preference ({wanted})"
            ),
            BlockReason::UnknownStep(name) => {
                write!(f, "identity provider asked for an unsupported step '{name}'")
            }
            BlockReason::StepLimitExceeded(n) => {
                write!(f, "login did not finish within {n} steps")
            }
            BlockReason::NoSuccess => {
                write!(f, "identity provider finished without issuing a success link")
            }
        }
    }
}

// ─── HandoffHint ──────────────────────────────────────────────────────────

/// Separates client-side assertion bugs from opaque relying-party rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffHint {
    /// The decoded SAMLResponse is not valid base64. A bug on this side.
    MalformedAssertion,
    /// The relying party answered the POST with an error status.
    RelyingPartyRejected { status: u16 },
    /// The POST was accepted but no session came out of it.
    SessionNotEstablished,
}

impl HandoffHint {
    pub fn guidance(&self) -> &'static str {
        match self {
            HandoffHint::MalformedAssertion => {
                "The SAML assertion could not be decoded locally. This is a client bug; \
                 the login page's form encoding may have changed."
            }
            HandoffHint::RelyingPartyRejected { .. } => {
                "The application rejected a well-formed sign-in assertion. Try again later \
                 or sign in with a browser."
            }
            HandoffHint::SessionNotEstablished => {
                "The application accepted the sign-in but did not start a session. \
                 Sign in with a browser to confirm the account works."
            }
        }
    }
}

impl fmt::Display for HandoffHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffHint::MalformedAssertion => write!(f, "malformed assertion"),
            HandoffHint::RelyingPartyRejected { status } => {
                write!(f, "relying party rejected assertion with HTTP {status}")
            }
            HandoffHint::SessionNotEstablished => write!(f, "session not established"),
        }
    }
}

/// Collapse whitespace and cut `input` to at most `max` characters.
pub(crate) fn snippet(input: &str, max: usize) -> String {
    let collapsed: String = input.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &collapsed[..idx]),
        None => collapsed,
    }
}
