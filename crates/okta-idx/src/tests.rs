/// Interpretation and planning against IDX responses captured from a real
/// tenant (identifiers scrubbed).
#[cfg(test)]
mod unit {
    use crate::config::AuthenticatorPreference;
    use crate::credentials::{Credentials, StaticPasscode};
    use crate::error::{AuthError, BlockReason};
    use crate::idx::{interpret, plan, Action, IdxState, Phase, Secret};

    const IDP: &str = "https://sso.example.edu";
    const URL: &str = "https://sso.example.edu/idp/idx/identify";

    fn fixture(name: &str) -> String {
        let raw = match name {
            "introspect" => include_str!("../tests/fixtures/introspect.json"),
            "identify_mfa" => include_str!("../tests/fixtures/identify_mfa.json"),
            "identify_single" => include_str!("../tests/fixtures/identify_single.json"),
            "challenge_totp" => include_str!("../tests/fixtures/challenge_totp.json"),
            "success" => include_str!("../tests/fixtures/success.json"),
            "error_expired" => include_str!("../tests/fixtures/error_expired.json"),
            "wrong_code" => include_str!("../tests/fixtures/wrong_code.json"),
            "reenroll" => include_str!("../tests/fixtures/reenroll.json"),
            other => panic!("unknown fixture {other}"),
        };
        raw.replace("{{IDP}}", IDP)
            .replace("{{LONG_HANDLE}}", &"02.id.".repeat(300))
    }

    fn state(name: &str) -> IdxState {
        interpret(200, URL, &fixture(name), "tok", Some("prev"))
            .unwrap_or_else(|e| panic!("fixture {name} failed: {e}"))
    }

    fn creds() -> Credentials {
        Credentials::new("jdoe@example.edu", "correct horse", StaticPasscode("246810".into()))
    }

    #[test]
    fn introspect_offers_identify_with_password() {
        let s = state("introspect");
        assert_eq!(s.state_handle, "02.id.Qd3kP9xLmT7vRb2WcY8sNf4Hj6Ug1Ea5Zo0Ki");
        assert_eq!(s.step_names(), vec!["identify", "unlock-account"]);
        let identify = s.step("identify").unwrap();
        assert_eq!(identify.href, "https://sso.example.edu/idp/idx/identify");
        assert_eq!(identify.credential_field(), Some("passcode"));

        let action = plan(&Phase::Introspected, &s, &AuthenticatorPreference::default()).unwrap();
        assert!(matches!(action, Action::Identify { send_password: true, .. }));
    }

    #[test]
    fn identify_mfa_lists_both_authenticators() {
        let s = state("identify_mfa");
        assert_eq!(s.authenticators.len(), 2);
        let choices = s.step("select-authenticator-authenticate").unwrap().authenticator_choices();
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].id, "autEmail9x8");
        assert_eq!(choices[0].method_types, vec!["email"]);
        assert_eq!(choices[1].label, "Okta Verify");
        assert_eq!(choices[1].method_types, vec!["totp", "push"]);
    }

    #[test]
    fn okta_verify_totp_is_selected_by_key() {
        let s = state("identify_mfa");
        let prefs = AuthenticatorPreference {
            key: Some("okta_verify".into()),
            label: None,
            method_type: Some("totp".into()),
        };
        let action = plan(&Phase::Identified, &s, &prefs).unwrap();
        assert_eq!(action.href(), "https://sso.example.edu/idp/idx/challenge");
        let body = action.body(&s, &creds()).unwrap().unwrap();
        assert_eq!(body["authenticator"]["id"], "autOV7a6");
        assert_eq!(body["authenticator"]["methodType"], "totp");
        assert_eq!(body["stateHandle"], s.state_handle.as_str());
    }

    #[test]
    fn single_authenticator_skips_selection() {
        let s = state("identify_single");
        let action = plan(&Phase::Identified, &s, &AuthenticatorPreference::default()).unwrap();
        assert_eq!(action.href(), "https://sso.example.edu/idp/idx/challenge/answer");
        assert!(matches!(action, Action::AnswerChallenge { secret: Secret::Passcode, .. }));
        assert_eq!(action.next_phase(), Phase::Challenged);
    }

    #[test]
    fn totp_challenge_answers_with_schema_field() {
        let s = state("challenge_totp");
        assert_eq!(s.current_authenticator.as_ref().unwrap().key.as_deref(), Some("okta_verify"));
        let action = plan(&Phase::ChallengeSelected, &s, &AuthenticatorPreference::default()).unwrap();
        let body = action.body(&s, &creds()).unwrap().unwrap();
        assert_eq!(body["credentials"]["totp"], "246810");
    }

    #[test]
    fn success_carries_short_href_not_handle() {
        let s = state("success");
        assert!(s.state_handle.len() > 1500);
        let action = plan(&Phase::Challenged, &s, &AuthenticatorPreference::default()).unwrap();
        let Action::Redeem { success_href } = &action else {
            panic!("expected redeem")
        };
        assert_eq!(
            success_href,
            "https://sso.example.edu/login/token/redirect?stateToken=02.id.Rk8Ts3Lq9Wn2Yc5Vb7Mx4Pz1"
        );
        assert!(!success_href.contains(&s.state_handle));
        assert!(action.body(&s, &creds()).unwrap().is_none());
    }

    #[test]
    fn expired_session_is_protocol_error() {
        let err = interpret(401, URL, &fixture("error_expired"), "tok", None).unwrap_err();
        let AuthError::Protocol { i18n_key, message, .. } = err else {
            panic!("expected Protocol")
        };
        assert_eq!(i18n_key, "idx.session.expired");
        assert_eq!(message, "The session has expired.");
    }

    #[test]
    fn wrong_code_field_message_is_protocol_error() {
        let err = interpret(200, URL, &fixture("wrong_code"), "tok", None).unwrap_err();
        let AuthError::Protocol { i18n_key, .. } = &err else {
            panic!("expected Protocol")
        };
        assert_eq!(i18n_key, "api.authn.error.PASSCODE_INVALID");
        assert_eq!(err.user_message(), "Invalid code. Try again.");
    }

    #[test]
    fn expired_password_blocks() {
        let s = state("reenroll");
        let err = plan(&Phase::Challenged, &s, &AuthenticatorPreference::default()).unwrap_err();
        assert!(matches!(err, AuthError::Blocked(BlockReason::PasswordChangeRequired)));
    }
}
