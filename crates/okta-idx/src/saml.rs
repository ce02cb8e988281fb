use reqwest::Method;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AuthConfig, RelyingPartyConfig};
use crate::cookies::SessionCookies;
use crate::decode::{extract_saml_form, SamlAssertionForm};
use crate::error::{AuthError, HandoffHint, Result};
use crate::transport::{Body, Redirected, Transport};

pub const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

// ─── HandoffOutcome ───────────────────────────────────────────────────────

/// What the relying party did with the assertion.
#[derive(Debug, Clone)]
pub struct HandoffOutcome {
    /// Where the post-submit redirect chain ended.
    pub final_url: Url,
    pub status: u16,
    /// Every URL visited after the POST, in order.
    pub hops: Vec<Url>,
}

// ─── SamlHandoff ──────────────────────────────────────────────────────────

/// Turns a terminal IDX `success.href` into an established relying-party
/// session.
///
/// Never initiates SSO itself: the RelayState and any request binding were
/// fixed when the flow was primed, and this side only carries them through.
#[derive(Debug, Clone)]
pub struct SamlHandoff {
    idp_origin: Url,
    origin_header: String,
    idp_root: String,
    relying_party: Option<RelyingPartyConfig>,
}

impl SamlHandoff {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            idp_origin: config.idp_origin.clone(),
            origin_header: config.idp_origin_header(),
            idp_root: config.idp_root(),
            relying_party: config.relying_party.clone(),
        }
    }

    /// GET the literal `success.href` and lift the SAML form from the page.
    pub async fn follow_success(
        &self,
        transport: &mut Transport,
        success_href: &str,
    ) -> Result<SamlAssertionForm> {
        let url = self.idp_origin.join(success_href)?;
        let headers = [("accept", HTML_ACCEPT.to_string())];
        let landed = transport.get_following(&url, &headers).await?;
        let resp = landed.response;
        if !resp.is_success() {
            return Err(AuthError::UnexpectedStatus {
                status: resp.status,
                url: resp.url.to_string(),
            });
        }
        let form = extract_saml_form(&resp.body, &resp.url)?;
        debug!(
            action = %form.action,
            relay_state = form.relay_state.is_some(),
            assertion_len = form.saml_response.len(),
            "SAML form extracted"
        );

        if let Some(rp) = &self.relying_party {
            if form.action.origin() != rp.sso_login_url.origin() {
                warn!(
                    action = %form.action,
                    expected = %rp.sso_login_url.origin().ascii_serialization(),
                    "SAML form posts to a different origin than the configured relying party"
                );
            }
        }
        Ok(form)
    }

    /// POST the assertion to the form action and check that a session
    /// came out of it.
    ///
    /// The assertion is base64-checked first so a local decoding bug is never
    /// mistaken for a relying-party rejection.
    pub async fn submit(
        &self,
        transport: &mut Transport,
        form: &SamlAssertionForm,
    ) -> Result<HandoffOutcome> {
        if let Err(e) = form.verify_assertion() {
            return Err(AuthError::HandoffRejected {
                hint: HandoffHint::MalformedAssertion,
                detail: format!("SAMLResponse is not valid base64: {e}"),
            });
        }

        let headers = self.post_headers();
        let pairs = form
            .fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let resp = transport
            .send(Method::POST, &form.action, &headers, Body::Form(pairs))
            .await?;
        info!(status = resp.status, action = %form.action, "assertion submitted");
        reject_on_error_status(resp.status, &resp.url)?;

        let nav = [("accept", HTML_ACCEPT.to_string())];
        let mut landed = transport.follow(resp, &nav).await?;
        self.check_landing(&landed)?;

        // Some relying parties only issue their session cookie on the
        // target page itself.
        if let Some(rp) = &self.relying_party {
            if landed.response.url.path() != rp.target_url.path() {
                debug!(
                    landed = landed.response.url.path(),
                    target = rp.target_url.path(),
                    "visiting target page"
                );
                let target = transport.get_following(&rp.target_url, &nav).await?;
                self.check_landing(&target)?;
                landed.hops.push(rp.target_url.clone());
                landed.hops.extend(target.hops);
                landed.response = target.response;
            }
        }

        if let Some(name) = self
            .relying_party
            .as_ref()
            .and_then(|rp| rp.session_cookie.as_deref())
        {
            let authority = SessionCookies::authority(&form.action);
            if transport.cookies().get(&authority, name).is_none() {
                return Err(AuthError::HandoffRejected {
                    hint: HandoffHint::SessionNotEstablished,
                    detail: format!("session cookie {name} was not set by {authority}"),
                });
            }
        }

        Ok(HandoffOutcome {
            final_url: landed.response.url,
            status: landed.response.status,
            hops: landed.hops,
        })
    }

    /// Reject a redirect chain that passed a logout page or ended in an
    /// error status.
    fn check_landing(&self, landed: &Redirected) -> Result<()> {
        let markers = self
            .relying_party
            .as_ref()
            .map(|rp| rp.logout_markers.as_slice())
            .unwrap_or_default();
        if let Some(hop) = landed.hops.iter().find(|u| is_logout(u, markers)) {
            return Err(AuthError::HandoffRejected {
                hint: HandoffHint::SessionNotEstablished,
                detail: format!("relying party redirected to {}", hop.path()),
            });
        }
        reject_on_error_status(landed.response.status, &landed.response.url)
    }

    /// Headers a browser sends when the IdP page auto-submits the form.
    fn post_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("content-type", "application/x-www-form-urlencoded".to_string()),
            ("origin", self.origin_header.clone()),
            ("referer", self.idp_root.clone()),
            ("accept", HTML_ACCEPT.to_string()),
            ("upgrade-insecure-requests", "1".to_string()),
            ("sec-fetch-dest", "document".to_string()),
            ("sec-fetch-mode", "navigate".to_string()),
            ("sec-fetch-site", "cross-site".to_string()),
        ]
    }
}

fn reject_on_error_status(status: u16, url: &Url) -> Result<()> {
    if status >= 400 {
        return Err(AuthError::HandoffRejected {
            hint: HandoffHint::RelyingPartyRejected { status },
            detail: format!("HTTP {status} from {}", url.path()),
        });
    }
    Ok(())
}

fn is_logout(url: &Url, markers: &[String]) -> bool {
    let path = url.path().to_ascii_lowercase();
    markers
        .iter()
        .any(|m| !m.is_empty() && path.contains(&m.to_ascii_lowercase()))
}
