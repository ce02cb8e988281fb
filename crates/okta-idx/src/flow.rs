use std::future::Future;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::cookies::SessionCookies;
use crate::credentials::Credentials;
use crate::decode::{extract_sso_redirect, extract_state_token};
use crate::error::{AuthError, BlockReason, Result};
use crate::idx::{plan, Action, IdxClient, IdxState, Phase};
use crate::saml::{SamlHandoff, HTML_ACCEPT};
use crate::session::StoredSession;
use crate::transport::Transport;

// ─── AuthenticatedSession ─────────────────────────────────────────────────

/// The result of a completed login.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    /// Every cookie the flow collected, IdP and relying party alike.
    pub cookies: SessionCookies,
    /// RelayState exactly as the IdP's form carried it.
    pub relay_state: Option<String>,
    /// Where the relying party's post-assertion redirects ended.
    pub final_url: Url,
    /// The primary session cookie changed value during the flow. The
    /// relying party may still have accepted the assertion.
    pub primary_cookie_drifted: bool,
}

// ─── LoginFlow ────────────────────────────────────────────────────────────

/// One login, start to finish.
///
/// Every request of a flow goes through the flow's own [`Transport`], so two
/// `LoginFlow`s never share cookies. Steps run strictly in order; the only
/// concurrency is the caller running several flows side by side.
///
/// ```rust,ignore
/// let config = AuthConfig::load(Path::new("okta.yaml"))?;
/// let creds = Credentials::new("jdoe", password, StaticPasscode(code));
/// let session = LoginFlow::new(config)?.authenticate(&creds).await?;
/// ```
pub struct LoginFlow {
    config: AuthConfig,
    idx: IdxClient,
    handoff: SamlHandoff,
    transport: Transport,
    phase: Phase,
}

impl LoginFlow {
    pub fn new(config: AuthConfig) -> Result<Self> {
        Self::with_cookies(config, SessionCookies::new())
    }

    /// Start from previously stored cookies instead of an empty jar.
    pub fn with_cookies(config: AuthConfig, cookies: SessionCookies) -> Result<Self> {
        let transport = Transport::with_cookies(&config, cookies)?;
        Ok(Self {
            idx: IdxClient::new(&config),
            handoff: SamlHandoff::new(&config),
            transport,
            config,
            phase: Phase::Start,
        })
    }

    /// The last phase the flow reached. Failures do not move it.
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn cookies(&self) -> &SessionCookies {
        self.transport.cookies()
    }

    /// Full login from the configured relying party: initiate SSO there,
    /// authenticate against the IdP, and hand the assertion back.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<AuthenticatedSession> {
        let limit = self.config.flow_timeout();
        let result = bounded(limit, async {
            let html = self.initiate_sso().await?;
            let token = extract_state_token(&html)?;
            self.login_and_handoff(&token, credentials).await
        })
        .await;
        self.finish(result)
    }

    /// Login starting from an IdP sign-in page the caller already fetched.
    pub async fn authenticate_from_login_page(
        &mut self,
        html: &str,
        credentials: &Credentials,
    ) -> Result<AuthenticatedSession> {
        let token = extract_state_token(html)?;
        self.authenticate_with_token(&token, credentials).await
    }

    /// Login with an already decoded state token.
    pub async fn authenticate_with_token(
        &mut self,
        state_token: &str,
        credentials: &Credentials,
    ) -> Result<AuthenticatedSession> {
        let limit = self.config.flow_timeout();
        let result = bounded(limit, self.login_and_handoff(state_token, credentials)).await;
        self.finish(result)
    }

    /// Drive the IDX remediation loop only, returning the literal
    /// `success.href` once the IdP reports success.
    pub async fn run_idx(&mut self, state_token: &str, credentials: &Credentials) -> Result<String> {
        self.phase = Phase::Start;
        let mut state = self.idx.introspect(&mut self.transport, state_token).await?;
        self.advance(Phase::Introspected);

        let max_steps = self.config.max_remediation_steps;
        let mut steps = 0;
        loop {
            let action = plan(&self.phase, &state, &self.config.authenticator)?;
            if let Action::Redeem { success_href } = &action {
                self.advance(action.next_phase());
                return Ok(success_href.clone());
            }
            if steps >= max_steps {
                return Err(AuthError::Blocked(BlockReason::StepLimitExceeded(max_steps)));
            }
            steps += 1;
            state = self.step(&state, &action, credentials).await?;
            self.advance(action.next_phase());
        }
    }

    async fn step(&mut self, state: &IdxState, action: &Action, credentials: &Credentials) -> Result<IdxState> {
        self.idx
            .remediate(&mut self.transport, state, action, credentials)
            .await
    }

    async fn login_and_handoff(
        &mut self,
        state_token: &str,
        credentials: &Credentials,
    ) -> Result<AuthenticatedSession> {
        let success_href = self.run_idx(state_token, credentials).await?;
        let form = self
            .handoff
            .follow_success(&mut self.transport, &success_href)
            .await?;
        let outcome = self.handoff.submit(&mut self.transport, &form).await?;

        let cookies = self.transport.cookies().clone();
        Ok(AuthenticatedSession {
            primary_cookie_drifted: cookies.primary_drifted(),
            cookies,
            relay_state: form.relay_state,
            final_url: outcome.final_url,
        })
    }

    /// Whether `stored` still holds a live relying-party session.
    ///
    /// GETs the target page with the stored cookies, without following
    /// redirects, and reads the configured logged-in header. A missing
    /// header means the session is gone. This flow's own jar is not touched.
    pub async fn validate_session(&self, stored: &StoredSession) -> Result<bool> {
        let rp = self.config.relying_party.as_ref().ok_or_else(|| {
            AuthError::Config("relying_party is required to validate a session".into())
        })?;
        if stored.cookies.is_empty() {
            return Ok(false);
        }
        let mut transport = Transport::with_cookies(&self.config, stored.cookies.clone())?;
        let nav = [("accept", HTML_ACCEPT.to_string())];
        let resp = transport.get(&rp.target_url, &nav).await?;
        let logged_in = resp
            .header(&rp.logged_in_header)
            .is_some_and(|v| v.eq_ignore_ascii_case(&rp.logged_in_value));
        debug!(status = resp.status, logged_in, "stored session checked");
        Ok(logged_in)
    }

    /// Visit the deep link, then the relying party's SSO entry point, and
    /// return the IdP sign-in page it leads to.
    async fn initiate_sso(&mut self) -> Result<String> {
        let rp = self.config.relying_party.clone().ok_or_else(|| {
            AuthError::Config("relying_party is required to initiate SSO".into())
        })?;
        let nav = [("accept", HTML_ACCEPT.to_string())];

        let target = self.transport.get_following(&rp.target_url, &nav).await?;
        check_page(&target.response.url, target.response.status)?;

        let headers = [
            ("accept", HTML_ACCEPT.to_string()),
            ("referer", rp.target_url.to_string()),
        ];
        let landed = self
            .transport
            .get_following(&rp.sso_login_url, &headers)
            .await?;
        let mut page = landed.response;
        check_page(&page.url, page.status)?;

        if page.url.origin() != self.config.idp_origin.origin() {
            let app = extract_sso_redirect(&page.body, &self.config.idp_origin)
                .ok_or_else(|| AuthError::parse("IdP application URL", &page.body))?;
            info!(path = app.path(), "following SSO interstitial");
            page = self.transport.get_following(&app, &nav).await?.response;
            check_page(&page.url, page.status)?;
        }
        Ok(page.body)
    }

    fn advance(&mut self, next: Phase) {
        info!(from = %self.phase, to = %next, "phase");
        self.phase = next;
    }

    /// Drop the jar when the flow ends, whatever the outcome.
    fn finish(&mut self, result: Result<AuthenticatedSession>) -> Result<AuthenticatedSession> {
        if let Err(e) = &result {
            warn!(phase = %self.phase, error = %e, "login failed");
        }
        self.transport.cookies_mut().clear();
        result
    }
}

async fn bounded<T>(
    limit: std::time::Duration,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Timeout(limit)),
    }
}

fn check_page(url: &Url, status: u16) -> Result<()> {
    if status >= 400 {
        return Err(AuthError::UnexpectedStatus {
            status,
            url: url.to_string(),
        });
    }
    Ok(())
}
