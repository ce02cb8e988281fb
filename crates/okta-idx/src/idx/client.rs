use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use super::remediation::Action;
use super::state::{interpret, IdxState};
use crate::config::{AuthConfig, IdxConfig};
use crate::credentials::Credentials;
use crate::error::{AuthError, Result};
use crate::transport::{Body, Transport};

pub const INTROSPECT_PATH: &str = "/idp/idx/introspect";

/// The network half of the IDX protocol.
///
/// Holds no per-login state: the caller passes the flow's [`Transport`] and
/// the latest [`IdxState`] into every call, so one client can serve any
/// number of sequential flows.
#[derive(Debug, Clone)]
pub struct IdxClient {
    origin: Url,
    origin_header: String,
    idx: IdxConfig,
}

impl IdxClient {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            origin: config.idp_origin.clone(),
            origin_header: config.idp_origin_header(),
            idx: config.idx.clone(),
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("accept", self.idx.media_type.clone()),
            ("content-type", self.idx.media_type.clone()),
            ("origin", self.origin_header.clone()),
        ];
        if let Some(ua) = &self.idx.client_user_agent {
            headers.push(("x-okta-user-agent-extended", ua.clone()));
        }
        headers
    }

    /// Open the IDX transaction for a decoded state token.
    pub async fn introspect(&self, transport: &mut Transport, state_token: &str) -> Result<IdxState> {
        if state_token.contains("\\x") {
            warn!(
                token_prefix = %prefix(state_token),
                "state token still contains \\x escapes; introspect will likely fail"
            );
        }
        let url = self.origin.join(INTROSPECT_PATH)?;
        let body = Body::Json(json!({ "stateToken": state_token }));
        let resp = transport
            .send(Method::POST, &url, &self.headers(), body)
            .await?;
        let state = interpret(resp.status, url.as_str(), &resp.body, state_token, None)?;
        info!(
            steps = ?state.step_names(),
            authenticators = state.authenticators.len(),
            "introspected"
        );
        Ok(state)
    }

    /// Submit one remediation and interpret the reply.
    pub async fn remediate(
        &self,
        transport: &mut Transport,
        state: &IdxState,
        action: &Action,
        credentials: &Credentials,
    ) -> Result<IdxState> {
        let body = action.body(state, credentials)?.ok_or_else(|| {
            AuthError::Config(format!("{} is not a remediation step", action.step_name()))
        })?;
        let url = self.origin.join(action.href())?;
        debug!(step = action.step_name(), path = url.path(), "remediating");
        let resp = transport
            .send(Method::POST, &url, &self.headers(), Body::Json(body))
            .await?;
        interpret(
            resp.status,
            url.as_str(),
            &resp.body,
            &state.state_token,
            Some(&state.state_handle),
        )
    }
}

fn prefix(token: &str) -> &str {
    match token.char_indices().nth(8) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}
