//! The remediation interpreter.
//!
//! The server, not this client, decides which steps a login takes: the
//! remediation list differs by tenant and by how many authenticators the
//! account has. `plan` reads the latest `IdxState` and picks the one step to
//! take next, dispatching on the step's name. It performs no I/O, so every
//! decision is testable against canned responses.

use std::fmt;

use serde_json::{json, Value};

use super::state::{AuthenticatorChoice, AuthenticatorDescriptor, IdxState, RemediationStep};
use crate::config::AuthenticatorPreference;
use crate::credentials::Credentials;
use crate::error::{AuthError, BlockReason, Result};

pub const IDENTIFY: &str = "identify";
pub const SELECT_AUTHENTICATOR: &str = "select-authenticator-authenticate";
pub const CHALLENGE_AUTHENTICATOR: &str = "challenge-authenticator";

/// Steps the server offers alongside the real work; never acted on.
const AUXILIARY_STEPS: &[&str] = &[
    "select-enroll-profile",
    "redirect-idp",
    "unlock-account",
    "cancel",
    "skip",
    "launch-authenticator",
    "challenge-poll",
    "device-challenge-poll",
    "cancel-polling",
    "currentAuthenticator-resend",
    "currentAuthenticator-recover",
    "currentAuthenticatorEnrollment-resend",
    "currentAuthenticatorEnrollment-recover",
];

const PASSWORD_CHANGE_STEPS: &[&str] = &["reenroll-authenticator", "reset-authenticator"];

const ENROLLMENT_STEPS: &[&str] = &[
    "select-authenticator-enroll",
    "enroll-authenticator",
    "enroll-profile",
    "enroll-poll",
];

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where a login stands, named by the last successful action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Start,
    Introspected,
    Identified,
    ChallengeSelected,
    Challenged,
    /// Terminal. Carries the literal `success.href` to redeem.
    Authenticated { success_href: String },
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Authenticated { .. })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Start => "START",
            Phase::Introspected => "INTROSPECTED",
            Phase::Identified => "IDENTIFIED",
            Phase::ChallengeSelected => "CHALLENGE_SELECTED",
            Phase::Challenged => "CHALLENGED",
            Phase::Authenticated { .. } => "AUTHENTICATED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Which secret answers a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    Password,
    Passcode,
}

/// The next thing to do, as decided by [`plan`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Identify {
        href: String,
        send_password: bool,
    },
    SelectAuthenticator {
        href: String,
        choice: AuthenticatorChoice,
        method_type: Option<String>,
    },
    AnswerChallenge {
        href: String,
        credential_field: String,
        secret: Secret,
        authenticator: Option<AuthenticatorDescriptor>,
    },
    /// Authentication finished; GET this exact URL next.
    Redeem { success_href: String },
}

impl Action {
    pub fn step_name(&self) -> &'static str {
        match self {
            Action::Identify { .. } => IDENTIFY,
            Action::SelectAuthenticator { .. } => SELECT_AUTHENTICATOR,
            Action::AnswerChallenge { .. } => CHALLENGE_AUTHENTICATOR,
            Action::Redeem { .. } => "success-redirect",
        }
    }

    pub fn href(&self) -> &str {
        match self {
            Action::Identify { href, .. }
            | Action::SelectAuthenticator { href, .. }
            | Action::AnswerChallenge { href, .. } => href,
            Action::Redeem { success_href } => success_href,
        }
    }

    /// Phase reached once this action's request succeeds.
    pub fn next_phase(&self) -> Phase {
        match self {
            Action::Identify { .. } => Phase::Identified,
            Action::SelectAuthenticator { .. } => Phase::ChallengeSelected,
            Action::AnswerChallenge { .. } => Phase::Challenged,
            Action::Redeem { success_href } => Phase::Authenticated {
                success_href: success_href.clone(),
            },
        }
    }

    /// JSON body for the remediation POST. `Redeem` has none.
    ///
    /// The passcode source is only consulted for an MFA answer.
    pub fn body(&self, state: &IdxState, credentials: &Credentials) -> Result<Option<Value>> {
        let handle = state.state_handle.as_str();
        let body = match self {
            Action::Identify { send_password, .. } => {
                let mut body = json!({
                    "identifier": credentials.username,
                    "stateHandle": handle,
                });
                if *send_password {
                    body["credentials"] = json!({ "passcode": credentials.password });
                }
                body
            }
            Action::SelectAuthenticator {
                choice, method_type, ..
            } => {
                let mut authenticator = json!({ "id": choice.id });
                if let Some(m) = method_type {
                    authenticator["methodType"] = json!(m);
                }
                json!({ "authenticator": authenticator, "stateHandle": handle })
            }
            Action::AnswerChallenge {
                credential_field,
                secret,
                authenticator,
                ..
            } => {
                let value = match secret {
                    Secret::Password => credentials.password.clone(),
                    Secret::Passcode => credentials.passcode.passcode(authenticator.as_ref())?,
                };
                let mut creds = serde_json::Map::new();
                creds.insert(credential_field.clone(), Value::String(value));
                json!({ "credentials": creds, "stateHandle": handle })
            }
            Action::Redeem { .. } => return Ok(None),
        };
        Ok(Some(body))
    }
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Decide the next action from the latest state.
///
/// A `success` object always wins and its `href` is used verbatim. Unknown
/// step names block the login rather than being skipped.
pub fn plan(phase: &Phase, state: &IdxState, prefs: &AuthenticatorPreference) -> Result<Action> {
    if let Some(success) = &state.success {
        return Ok(Action::Redeem {
            success_href: success.href.clone(),
        });
    }

    if let Some(step) = state.step(IDENTIFY) {
        if *phase != Phase::Introspected {
            return Err(AuthError::Blocked(BlockReason::UnknownStep(format!(
                "{IDENTIFY} after {phase}"
            ))));
        }
        return Ok(Action::Identify {
            href: step.href.clone(),
            send_password: step.field("credentials").is_some(),
        });
    }

    let challenge = state.step(CHALLENGE_AUTHENTICATOR);
    let select = state.step(SELECT_AUTHENTICATOR);

    if let Some(challenge) = challenge {
        let offered = select.map_or(0, |s| s.authenticator_choices().len());
        let must_select = *phase != Phase::ChallengeSelected
            && select.is_some()
            && state.authenticators.len().max(offered) > 1;
        if !must_select {
            return Ok(answer(challenge, state));
        }
    }

    if let Some(select) = select {
        return choose(select, state, prefs);
    }

    Err(AuthError::Blocked(blocked_reason(state)))
}

fn answer(step: &RemediationStep, state: &IdxState) -> Action {
    let authenticator = state.current_authenticator.clone();
    let secret = match &authenticator {
        Some(a) if a.is_password() => Secret::Password,
        _ => Secret::Passcode,
    };
    Action::AnswerChallenge {
        href: step.href.clone(),
        credential_field: step.credential_field().unwrap_or("passcode").to_string(),
        secret,
        authenticator,
    }
}

fn choose(step: &RemediationStep, state: &IdxState, prefs: &AuthenticatorPreference) -> Result<Action> {
    let choices = step.authenticator_choices();
    let picked = if prefs.is_empty() {
        choices.into_iter().next()
    } else {
        choices
            .iter()
            .find(|c| {
                prefs.key.as_deref().is_some_and(|key| {
                    state
                        .authenticator(&c.id)
                        .and_then(|a| a.key.as_deref())
                        == Some(key)
                })
            })
            .or_else(|| {
                choices.iter().find(|c| {
                    prefs
                        .label
                        .as_deref()
                        .is_some_and(|label| c.label.eq_ignore_ascii_case(label))
                })
            })
            .cloned()
    };
    let choice = picked.ok_or_else(|| {
        AuthError::Blocked(BlockReason::NoUsableAuthenticator(prefs.describe()))
    })?;

    let method_type = match &prefs.method_type {
        Some(m) if choice.method_types.is_empty() || choice.method_types.contains(m) => {
            Some(m.clone())
        }
        _ if choice.method_types.len() == 1 => choice.method_types.first().cloned(),
        _ => None,
    };

    Ok(Action::SelectAuthenticator {
        href: step.href.clone(),
        choice,
        method_type,
    })
}

fn blocked_reason(state: &IdxState) -> BlockReason {
    let names = state.step_names();
    if names.iter().any(|n| PASSWORD_CHANGE_STEPS.contains(n)) {
        return BlockReason::PasswordChangeRequired;
    }
    if let Some(n) = names.iter().find(|n| ENROLLMENT_STEPS.contains(n)) {
        return BlockReason::EnrollmentRequired(n.to_string());
    }
    match names.iter().find(|n| !AUXILIARY_STEPS.contains(n)) {
        Some(n) => BlockReason::UnknownStep(n.to_string()),
        None => BlockReason::NoSuccess,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticPasscode;
    use crate::idx::state::{FieldSpec, OptionSpec};
    use crate::idx::types::SuccessLink;

    fn field(name: &str) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            label: None,
            kind: None,
            required: true,
            secret: false,
            value: None,
            nested: vec![],
            options: vec![],
        }
    }

    fn step(name: &str, href: &str, fields: Vec<FieldSpec>) -> RemediationStep {
        RemediationStep {
            name: name.into(),
            href: href.into(),
            method: "POST".into(),
            fields,
        }
    }

    fn credentials_field(inner: &str) -> FieldSpec {
        FieldSpec {
            nested: vec![field(inner)],
            ..field("credentials")
        }
    }

    fn authenticator(kind: &str, key: &str, id: &str, name: &str) -> AuthenticatorDescriptor {
        AuthenticatorDescriptor {
            kind: kind.into(),
            key: Some(key.into()),
            id: id.into(),
            display_name: name.into(),
            methods: vec![],
        }
    }

    fn option(label: &str, id: &str, methods: &[&str]) -> OptionSpec {
        let mut fields = vec![FieldSpec {
            value: Some(json!(id)),
            ..field("id")
        }];
        if !methods.is_empty() {
            fields.push(FieldSpec {
                options: methods
                    .iter()
                    .map(|m| OptionSpec {
                        label: m.to_string(),
                        value: json!(m),
                        fields: vec![],
                    })
                    .collect(),
                ..field("methodType")
            });
        }
        OptionSpec {
            label: label.into(),
            value: json!({}),
            fields,
        }
    }

    fn state(steps: Vec<RemediationStep>, authenticators: Vec<AuthenticatorDescriptor>) -> IdxState {
        IdxState {
            state_token: "tok".into(),
            state_handle: "handle".into(),
            remediation_options: steps,
            authenticators,
            current_authenticator: None,
            success: None,
            expires_at: None,
        }
    }

    fn select_step() -> RemediationStep {
        step(
            SELECT_AUTHENTICATOR,
            "/idp/idx/challenge",
            vec![FieldSpec {
                options: vec![
                    option("Email", "autEmail", &["email"]),
                    option("Okta Verify", "autOV", &["totp", "push"]),
                ],
                ..field("authenticator")
            }],
        )
    }

    fn two_authenticators() -> Vec<AuthenticatorDescriptor> {
        vec![
            authenticator("email", "okta_email", "autEmail", "Email"),
            authenticator("app", "okta_verify", "autOV", "Okta Verify"),
        ]
    }

    fn creds() -> Credentials {
        Credentials::new("jdoe", "pw", StaticPasscode("123456".into()))
    }

    #[test]
    fn success_href_wins_over_everything() {
        let mut s = state(vec![step(IDENTIFY, "/idp/idx/identify", vec![])], vec![]);
        s.state_handle = "x".repeat(1500);
        s.success = Some(SuccessLink {
            name: "success-redirect".into(),
            href: "https://sso.example.edu/login/token/redirect?stateToken=short".into(),
        });
        let action = plan(&Phase::Challenged, &s, &Default::default()).unwrap();
        assert_eq!(
            action.href(),
            "https://sso.example.edu/login/token/redirect?stateToken=short"
        );
        assert!(!action.href().contains(&s.state_handle));
    }

    #[test]
    fn identify_with_password_field_sends_password() {
        let s = state(
            vec![
                step(IDENTIFY, "/idp/idx/identify", vec![field("identifier"), credentials_field("passcode")]),
                step("unlock-account", "/idp/idx/unlock-account", vec![]),
            ],
            vec![],
        );
        let action = plan(&Phase::Introspected, &s, &Default::default()).unwrap();
        let body = action.body(&s, &creds()).unwrap().unwrap();
        assert_eq!(
            body,
            json!({"identifier": "jdoe", "credentials": {"passcode": "pw"}, "stateHandle": "handle"})
        );
        assert_eq!(action.next_phase(), Phase::Identified);
    }

    #[test]
    fn identify_without_password_field_sends_identifier_only() {
        let s = state(vec![step(IDENTIFY, "/i", vec![field("identifier")])], vec![]);
        let action = plan(&Phase::Introspected, &s, &Default::default()).unwrap();
        let body = action.body(&s, &creds()).unwrap().unwrap();
        assert!(body.get("credentials").is_none());
    }

    #[test]
    fn single_authenticator_answers_directly() {
        let mut s = state(
            vec![step(CHALLENGE_AUTHENTICATOR, "/idp/idx/challenge/answer", vec![credentials_field("passcode")])],
            vec![authenticator("app", "okta_verify", "autOV", "Okta Verify")],
        );
        s.current_authenticator = s.authenticators.first().cloned();
        let action = plan(&Phase::Identified, &s, &Default::default()).unwrap();
        assert!(matches!(action, Action::AnswerChallenge { secret: Secret::Passcode, .. }));
        assert_eq!(action.next_phase(), Phase::Challenged);
        let body = action.body(&s, &creds()).unwrap().unwrap();
        assert_eq!(body, json!({"credentials": {"passcode": "123456"}, "stateHandle": "handle"}));
    }

    #[test]
    fn multiple_authenticators_select_first() {
        let s = state(
            vec![
                select_step(),
                step(CHALLENGE_AUTHENTICATOR, "/idp/idx/challenge/answer", vec![]),
            ],
            two_authenticators(),
        );
        let prefs = AuthenticatorPreference {
            key: Some("okta_verify".into()),
            label: None,
            method_type: Some("totp".into()),
        };
        let action = plan(&Phase::Identified, &s, &prefs).unwrap();
        let body = action.body(&s, &creds()).unwrap().unwrap();
        assert_eq!(
            body,
            json!({"authenticator": {"id": "autOV", "methodType": "totp"}, "stateHandle": "handle"})
        );
    }

    #[test]
    fn select_choices_count_when_authenticator_list_is_missing() {
        let s = state(
            vec![
                step(CHALLENGE_AUTHENTICATOR, "/idp/idx/challenge/answer", vec![credentials_field("passcode")]),
                select_step(),
            ],
            vec![],
        );
        let action = plan(&Phase::Identified, &s, &Default::default()).unwrap();
        assert!(matches!(action, Action::SelectAuthenticator { .. }));
        assert_eq!(action.href(), "/idp/idx/challenge");
    }

    #[test]
    fn after_selection_challenge_is_answered_with_schema_field() {
        let s = state(
            vec![
                step(CHALLENGE_AUTHENTICATOR, "/idp/idx/challenge/answer", vec![credentials_field("totp")]),
                select_step(),
            ],
            two_authenticators(),
        );
        let action = plan(&Phase::ChallengeSelected, &s, &Default::default()).unwrap();
        let body = action.body(&s, &creds()).unwrap().unwrap();
        assert_eq!(body["credentials"], json!({"totp": "123456"}));
    }

    #[test]
    fn label_preference_and_single_method() {
        let s = state(vec![select_step()], vec![]);
        let prefs = AuthenticatorPreference {
            key: None,
            label: Some("email".into()),
            method_type: None,
        };
        let Action::SelectAuthenticator { choice, method_type, .. } =
            plan(&Phase::Identified, &s, &prefs).unwrap()
        else {
            panic!("expected selection")
        };
        assert_eq!(choice.id, "autEmail");
        assert_eq!(method_type.as_deref(), Some("email"));
    }

    #[test]
    fn unmatched_preference_blocks() {
        let s = state(vec![select_step()], two_authenticators());
        let prefs = AuthenticatorPreference {
            key: Some("phone_number".into()),
            ..Default::default()
        };
        let err = plan(&Phase::Identified, &s, &prefs).unwrap_err();
        assert!(matches!(err, AuthError::Blocked(BlockReason::NoUsableAuthenticator(_))));
    }

    #[test]
    fn password_challenge_uses_password() {
        let mut s = state(
            vec![step(CHALLENGE_AUTHENTICATOR, "/a", vec![credentials_field("passcode")])],
            vec![],
        );
        s.current_authenticator = Some(authenticator("password", "okta_password", "autPw", "Password"));
        let action = plan(&Phase::Identified, &s, &Default::default()).unwrap();
        let body = action.body(&s, &creds()).unwrap().unwrap();
        assert_eq!(body["credentials"]["passcode"], "pw");
    }

    #[test]
    fn forced_password_change_blocks() {
        let s = state(
            vec![
                step("reenroll-authenticator", "/idp/idx/challenge/answer", vec![]),
                step("cancel", "/idp/idx/cancel", vec![]),
            ],
            vec![],
        );
        let err = plan(&Phase::Challenged, &s, &Default::default()).unwrap_err();
        assert!(matches!(err, AuthError::Blocked(BlockReason::PasswordChangeRequired)));
    }

    #[test]
    fn unknown_step_blocks_with_its_name() {
        let s = state(
            vec![
                step("cancel", "/c", vec![]),
                step("consent", "/idp/idx/consent", vec![]),
            ],
            vec![],
        );
        let err = plan(&Phase::Challenged, &s, &Default::default()).unwrap_err();
        let AuthError::Blocked(BlockReason::UnknownStep(name)) = err else {
            panic!("expected UnknownStep")
        };
        assert_eq!(name, "consent");
    }

    #[test]
    fn only_auxiliary_steps_means_no_success() {
        let s = state(vec![step("cancel", "/c", vec![])], vec![]);
        let err = plan(&Phase::Challenged, &s, &Default::default()).unwrap_err();
        assert!(matches!(err, AuthError::Blocked(BlockReason::NoSuccess)));
    }

    #[test]
    fn repeated_identify_blocks() {
        let s = state(vec![step(IDENTIFY, "/i", vec![])], vec![]);
        let err = plan(&Phase::Identified, &s, &Default::default()).unwrap_err();
        assert!(matches!(err, AuthError::Blocked(BlockReason::UnknownStep(_))));
    }
}
