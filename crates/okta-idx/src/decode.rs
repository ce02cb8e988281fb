//! Lifting protocol values out of rendered HTML.
//!
//! Two encodings get in the way. The IdP login page embeds its state token
//! inside a JavaScript literal, where characters such as `-` arrive as
//! `\x2D`. The token-redirect page carries the SAML form with attribute
//! values HTML-entity encoded (`&#x2B;` for `+`, `&#x3a;` for `:`). Values
//! lifted from HTML always go through the matching decoder; values from the
//! JSON API never do.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::{AuthError, Result};

pub const SAML_RESPONSE_FIELD: &str = "SAMLResponse";
pub const RELAY_STATE_FIELD: &str = "RelayState";

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

static STATE_TOKEN_RE: OnceLock<Regex> = OnceLock::new();
static STATE_TOKEN_PARAM_RE: OnceLock<Regex> = OnceLock::new();
static FORM_RE: OnceLock<Regex> = OnceLock::new();
static INPUT_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_RE: OnceLock<Regex> = OnceLock::new();
static APP_URL_RE: OnceLock<Regex> = OnceLock::new();

fn state_token_re() -> &'static Regex {
    STATE_TOKEN_RE.get_or_init(|| Regex::new(r#""stateToken"\s*:\s*"((?:[^"\\]|\\.)+)""#).unwrap())
}

fn state_token_param_re() -> &'static Regex {
    STATE_TOKEN_PARAM_RE.get_or_init(|| Regex::new(r#"stateToken=([^&"'\s<>]+)"#).unwrap())
}

fn form_re() -> &'static Regex {
    FORM_RE.get_or_init(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form>").unwrap())
}

fn input_re() -> &'static Regex {
    INPUT_RE.get_or_init(|| Regex::new(r"(?is)<input\b([^>]*)>").unwrap())
}

fn attr_re() -> &'static Regex {
    ATTR_RE.get_or_init(|| {
        Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}

fn app_url_re() -> &'static Regex {
    APP_URL_RE.get_or_init(|| Regex::new(r#"https?://[^/"'<>\s]+/app/[^"'<>\s]+"#).unwrap())
}

// ---------------------------------------------------------------------------
// State token
// ---------------------------------------------------------------------------

/// Extract the IDX state token from the IdP login page and decode it.
///
/// Looks for a `"stateToken": "<value>"` literal first, then a
/// `stateToken=<value>` URL parameter. Either way the hex escapes are
/// decoded; an undecoded token is only rejected later, at introspect, with
/// a misleading "session expired" message.
pub fn extract_state_token(html: &str) -> Result<String> {
    let raw = state_token_re()
        .captures(html)
        .or_else(|| state_token_param_re().captures(html))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| AuthError::parse("\"stateToken\": \"<value>\"", html))?;
    let token = decode_js_escapes(raw);
    if token.is_empty() {
        return Err(AuthError::parse("non-empty stateToken", html));
    }
    Ok(token)
}

/// Decode JavaScript string escapes: `\xHH`, `\uHHHH` and `\\ \/ \" \'`.
///
/// Input without escapes is returned unchanged. Malformed escapes are kept
/// literally.
pub fn decode_js_escapes(input: &str) -> String {
    if !input.contains('\\') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let (decoded, consumed) = decode_one_escape(tail);
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..consumed]),
        }
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

/// Decode the escape at the start of `tail` (which begins with `\`).
///
/// Returns the decoded char, if any, and how many bytes were consumed.
fn decode_one_escape(tail: &str) -> (Option<char>, usize) {
    let mut chars = tail.chars();
    chars.next();
    match chars.next() {
        Some('x') => match hex_char(tail.get(2..4)) {
            Some(c) => (Some(c), 4),
            None => (None, 1),
        },
        Some('u') => match hex_char(tail.get(2..6)) {
            Some(c) => (Some(c), 6),
            None => (None, 1),
        },
        Some(c @ ('\\' | '/' | '"' | '\'')) => (Some(c), 2),
        _ => (None, 1),
    }
}

fn hex_char(digits: Option<&str>) -> Option<char> {
    let digits = digits?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok().and_then(char::from_u32)
}

// ---------------------------------------------------------------------------
// HTML entities
// ---------------------------------------------------------------------------

/// Decode numeric character references and the basic named entities.
///
/// Unknown named entities are left as they are.
pub fn decode_html_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match tail.find(';').filter(|&end| end <= 12) {
            Some(end) => match entity_char(&tail[1..end]) {
                Some(c) => {
                    out.push(c);
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &tail[1..];
                }
            },
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity_char(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// SAML form
// ---------------------------------------------------------------------------

/// The auto-submitting form delivered by the token-redirect page.
///
/// All fields are entity-decoded. `relay_state` is whatever the page says;
/// it was fixed when SSO was initiated, not chosen by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlAssertionForm {
    pub action: Url,
    pub saml_response: String,
    pub relay_state: Option<String>,
}

impl SamlAssertionForm {
    /// Base64-decode the assertion to confirm it survived extraction intact.
    ///
    /// Line breaks inside the value are tolerated.
    pub fn verify_assertion(&self) -> std::result::Result<Vec<u8>, base64::DecodeError> {
        let compact: String = self
            .saml_response
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        STANDARD.decode(compact)
    }

    /// Replace the observed RelayState. Test use only: the real value is
    /// bound when SSO is initiated and the relying party may reject others.
    pub fn override_relay_state(&mut self, relay_state: impl Into<String>) {
        let relay_state = relay_state.into();
        warn!(
            observed = ?self.relay_state,
            "overriding RelayState with a caller-supplied value"
        );
        self.relay_state = Some(relay_state);
    }

    /// Form body as sent to the relying party.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![(SAML_RESPONSE_FIELD, self.saml_response.as_str())];
        if let Some(rs) = &self.relay_state {
            fields.push((RELAY_STATE_FIELD, rs.as_str()));
        }
        fields
    }
}

/// Parse the SAML auto-submit form out of `html`.
///
/// `base` resolves a relative `action`.
pub fn extract_saml_form(html: &str, base: &Url) -> Result<SamlAssertionForm> {
    let form = form_re()
        .captures_iter(html)
        .find(|c| c.get(2).is_some_and(|body| body.as_str().contains(SAML_RESPONSE_FIELD)))
        .ok_or_else(|| AuthError::parse("<form> containing SAMLResponse", html))?;

    let form_attrs = attributes(form.get(1).map_or("", |m| m.as_str()));
    let action = attr(&form_attrs, "action")
        .map(decode_html_entities)
        .ok_or_else(|| AuthError::parse("<form action=...>", html))?;
    let action = base.join(&action)?;

    let mut saml_response = None;
    let mut relay_state = None;
    let body = form.get(2).map_or("", |m| m.as_str());
    for input in input_re().captures_iter(body) {
        let attrs = attributes(input.get(1).map_or("", |m| m.as_str()));
        let value = attr(&attrs, "value").map(decode_html_entities);
        match attr(&attrs, "name") {
            Some(SAML_RESPONSE_FIELD) => saml_response = value,
            Some(RELAY_STATE_FIELD) => relay_state = value,
            _ => {}
        }
    }

    let saml_response = saml_response
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::parse("<input name=\"SAMLResponse\" value=...>", body))?;

    Ok(SamlAssertionForm {
        action,
        saml_response,
        relay_state,
    })
}

fn attributes(tag: &str) -> Vec<(String, &str)> {
    attr_re()
        .captures_iter(tag)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_ascii_lowercase();
            let value = c.get(2).or_else(|| c.get(3))?.as_str();
            Some((name, value))
        })
        .collect()
}

fn attr<'a>(attrs: &[(String, &'a str)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
}

// ---------------------------------------------------------------------------
// SSO redirect
// ---------------------------------------------------------------------------

/// Find the IdP application URL (`<idp_origin>/app/...`) on a relying-party
/// interstitial page.
pub fn extract_sso_redirect(html: &str, idp_origin: &Url) -> Option<Url> {
    let origin = idp_origin.origin();
    app_url_re()
        .find_iter(html)
        .filter_map(|m| Url::parse(&decode_html_entities(m.as_str())).ok())
        .find(|url| url.origin() == origin)
}
