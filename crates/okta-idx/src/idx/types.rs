use serde::{Deserialize, Serialize};

// ─── ION envelopes ────────────────────────────────────────────────────────

/// `{"type": "array", "value": [...]}`, the ION collection wrapper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IonCollection<T> {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

impl<T> Default for IonCollection<T> {
    fn default() -> Self {
        Self {
            kind: None,
            value: Vec::new(),
        }
    }
}

/// `{"type": "object", "value": {...}}`, the ION object wrapper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IonObject<T> {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub value: T,
}

// ─── Response ─────────────────────────────────────────────────────────────

/// One `/idp/idx/*` response body.
///
/// Only the parts the login flow reads are modelled; everything else the
/// server sends (`app`, `user`, `cancel`, ...) is ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdxResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<IonCollection<RemediationForm>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticators: Option<IonCollection<Authenticator>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_authenticator: Option<IonObject<Authenticator>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_authenticator_enrollment: Option<IonObject<Authenticator>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<IonCollection<IdxMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<SuccessLink>,
}

/// A server-declared next step: where to POST and what to send.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationForm {
    pub name: String,
    #[serde(default)]
    pub href: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub value: Vec<FormField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepts: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// One input of a remediation form, possibly with a nested sub-form.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<bool>,
    /// Prefilled values are either scalars or nested objects depending on
    /// the field, so `Value` is correct here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<NestedForm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<IonCollection<IdxMessage>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NestedForm {
    #[serde(default)]
    pub value: Vec<FormField>,
}

/// A selectable option. For `authenticator` fields the value is
/// `{"form": {"value": [...]}}`; for `methodType` it is a plain string.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOption {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl FieldOption {
    /// Fields of the option's embedded form, if it has one.
    pub fn nested_fields(&self) -> Vec<FormField> {
        self.value
            .get("form")
            .and_then(|f| f.get("value"))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// An authenticator the account has enrolled.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticator {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<AuthenticatorMethod>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthenticatorMethod {
    #[serde(rename = "type")]
    pub kind: String,
}

/// `messages.value[]` entry. `class` is `ERROR`, `WARNING` or `INFO`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdxMessage {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i18n: Option<I18n>,
    #[serde(default)]
    pub class: String,
}

impl IdxMessage {
    pub fn is_error(&self) -> bool {
        self.class.eq_ignore_ascii_case("ERROR")
    }

    pub fn i18n_key(&self) -> &str {
        self.i18n.as_ref().map_or("", |i| i.key.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct I18n {
    pub key: String,
}

/// Terminal success link. `href` embeds a fresh short-form state token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SuccessLink {
    #[serde(default)]
    pub name: String,
    pub href: String,
}
