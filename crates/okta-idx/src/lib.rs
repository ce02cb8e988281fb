//! `okta-idx`: a headless Okta Identity Engine login that ends in a SAML
//! handoff to a relying-party web application.
//!
//! # Architecture
//!
//! ```text
//! LoginFlow          ← one login; owns the per-flow Transport
//!     │
//!     ├─ initiate SSO at the relying party, lift the stateToken (decode)
//!     │
//!     ├─ IdxClient   ← introspect, then one remediation per server step
//!     │     │           (idx::remediation::plan decides which)
//!     │     ▼
//!     │   success.href
//!     │
//!     └─ SamlHandoff ← GET success.href, decode the auto-submit form,
//!                       POST SAMLResponse + RelayState to the relying party
//! ```
//!
//! Every request of a flow goes through the same cookie jar
//! ([`SessionCookies`]); cookies set by either server are sent back on each
//! later request to that server.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use okta_idx::{AuthConfig, Credentials, LoginFlow, StaticPasscode};
//!
//! let config = AuthConfig::load(Path::new("okta.yaml"))?;
//! let creds = Credentials::new("jdoe", password, StaticPasscode(code));
//! let mut flow = LoginFlow::new(config)?;
//! match flow.authenticate(&creds).await {
//!     Ok(session) => println!("landed on {}", session.final_url),
//!     Err(e) => eprintln!("{}", e.user_message()),
//! }
//! ```

pub mod config;
pub mod cookies;
pub mod credentials;
pub mod decode;
pub mod error;
pub mod flow;
pub mod idx;
pub mod saml;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use config::{
    AuthConfig, AuthenticatorPreference, ConfigWarning, IdxConfig, RelyingPartyConfig, WarnLevel,
};
pub use cookies::{CookieDrift, SessionCookies};
pub use credentials::{Credentials, PasscodeSource, StaticPasscode};
pub use decode::{
    decode_html_entities, decode_js_escapes, extract_saml_form, extract_state_token,
    SamlAssertionForm,
};
pub use error::{AuthError, BlockReason, HandoffHint, Result};
pub use flow::{AuthenticatedSession, LoginFlow};
pub use idx::{Action, IdxClient, IdxState, Phase};
pub use saml::{HandoffOutcome, SamlHandoff};
pub use session::{SessionStore, StoredSession};
