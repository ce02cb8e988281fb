use serde_json::Value;

use super::types::{Authenticator, FieldOption, FormField, IdxMessage, IdxResponse, RemediationForm, SuccessLink};
use crate::error::{AuthError, Result};

// ---------------------------------------------------------------------------
// IdxState
// ---------------------------------------------------------------------------

/// The server-asserted authentication state after one IDX response.
///
/// Each response replaces the previous state entirely; nothing is merged
/// except the state handle, which the server may omit when unchanged.
#[derive(Debug, Clone)]
pub struct IdxState {
    /// The decoded token the transaction was introspected with.
    pub state_token: String,
    /// Long-lived handle sent in every remediation body. Never usable as a
    /// redirect token.
    pub state_handle: String,
    pub remediation_options: Vec<RemediationStep>,
    pub authenticators: Vec<AuthenticatorDescriptor>,
    pub current_authenticator: Option<AuthenticatorDescriptor>,
    pub success: Option<SuccessLink>,
    pub expires_at: Option<String>,
}

impl IdxState {
    pub fn step(&self, name: &str) -> Option<&RemediationStep> {
        self.remediation_options.iter().find(|s| s.name == name)
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.step(name).is_some()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.remediation_options.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn authenticator(&self, id: &str) -> Option<&AuthenticatorDescriptor> {
        self.authenticators.iter().find(|a| a.id == id)
    }

    pub fn is_success(&self) -> bool {
        self.success.is_some()
    }
}

// ---------------------------------------------------------------------------
// RemediationStep / FieldSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RemediationStep {
    pub name: String,
    pub href: String,
    pub method: String,
    pub fields: Vec<FieldSpec>,
}

impl RemediationStep {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the secret inside the `credentials` sub-form, e.g. `passcode`
    /// or `totp`.
    pub fn credential_field(&self) -> Option<&str> {
        self.field("credentials")?
            .nested
            .first()
            .map(|f| f.name.as_str())
    }

    /// Authenticators offered by a `select-authenticator-*` step.
    pub fn authenticator_choices(&self) -> Vec<AuthenticatorChoice> {
        let Some(field) = self.field("authenticator") else {
            return Vec::new();
        };
        field
            .options
            .iter()
            .filter_map(|opt| {
                let id = opt
                    .fields
                    .iter()
                    .find(|f| f.name == "id")
                    .and_then(|f| f.value.as_ref())
                    .and_then(Value::as_str)?
                    .to_string();
                let method_types = opt
                    .fields
                    .iter()
                    .find(|f| f.name == "methodType")
                    .map(FieldSpec::allowed_values)
                    .unwrap_or_default();
                Some(AuthenticatorChoice {
                    label: opt.label.clone(),
                    id,
                    method_types,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub label: Option<String>,
    pub kind: Option<String>,
    pub required: bool,
    pub secret: bool,
    pub value: Option<Value>,
    pub nested: Vec<FieldSpec>,
    pub options: Vec<OptionSpec>,
}

impl FieldSpec {
    /// Prefilled value, or the values of the field's options.
    pub fn allowed_values(&self) -> Vec<String> {
        if let Some(v) = self.value.as_ref().and_then(Value::as_str) {
            return vec![v.to_string()];
        }
        self.options
            .iter()
            .filter_map(|o| o.value.as_str().map(str::to_string))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub label: String,
    pub value: Value,
    pub fields: Vec<FieldSpec>,
}

/// One entry of a `select-authenticator-*` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorChoice {
    pub label: String,
    pub id: String,
    pub method_types: Vec<String>,
}

// ---------------------------------------------------------------------------
// AuthenticatorDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorDescriptor {
    /// `password`, `app`, `email`, `phone`, ...
    pub kind: String,
    pub key: Option<String>,
    pub id: String,
    pub display_name: String,
    pub methods: Vec<String>,
}

impl AuthenticatorDescriptor {
    pub fn is_password(&self) -> bool {
        self.kind == "password"
    }
}

impl From<Authenticator> for AuthenticatorDescriptor {
    fn from(a: Authenticator) -> Self {
        Self {
            kind: a.kind,
            key: a.key,
            id: a.id,
            display_name: a.display_name,
            methods: a.methods.into_iter().map(|m| m.kind).collect(),
        }
    }
}

impl From<FormField> for FieldSpec {
    fn from(f: FormField) -> Self {
        Self {
            name: f.name,
            label: f.label,
            kind: f.kind,
            required: f.required,
            secret: f.secret.unwrap_or(false),
            value: f.value,
            nested: f
                .form
                .map(|form| form.value.into_iter().map(FieldSpec::from).collect())
                .unwrap_or_default(),
            options: f.options.into_iter().map(OptionSpec::from).collect(),
        }
    }
}

impl From<FieldOption> for OptionSpec {
    fn from(o: FieldOption) -> Self {
        let fields = o.nested_fields().into_iter().map(FieldSpec::from).collect();
        Self {
            label: o.label,
            value: o.value,
            fields,
        }
    }
}

impl From<RemediationForm> for RemediationStep {
    fn from(r: RemediationForm) -> Self {
        Self {
            name: r.name,
            href: r.href,
            method: r.method,
            fields: r.value.into_iter().map(FieldSpec::from).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// interpret
// ---------------------------------------------------------------------------

/// Turn one IDX HTTP response into the next `IdxState`.
///
/// Error messages win over everything else, whatever the HTTP status: the
/// server reports some failures (expired session, wrong code) with a 200.
/// `previous_handle` stands in when the response omits `stateHandle`.
pub fn interpret(
    status: u16,
    url: &str,
    body: &str,
    state_token: &str,
    previous_handle: Option<&str>,
) -> Result<IdxState> {
    let success_status = (200..300).contains(&status);
    let response: IdxResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(_) if !success_status => {
            return Err(AuthError::UnexpectedStatus {
                status,
                url: url.to_string(),
            })
        }
        Err(_) => return Err(AuthError::parse("IDX JSON response", body)),
    };

    if let Some(msg) = first_error(&response) {
        return Err(AuthError::Protocol {
            message: msg.message.clone(),
            i18n_key: msg.i18n_key().to_string(),
            status,
        });
    }
    if !success_status {
        return Err(AuthError::UnexpectedStatus {
            status,
            url: url.to_string(),
        });
    }

    let state_handle = match (response.state_handle, previous_handle) {
        (Some(h), _) => h,
        (None, Some(prev)) => prev.to_string(),
        (None, None) if response.success.is_some() => String::new(),
        (None, None) => return Err(AuthError::parse("stateHandle", body)),
    };

    Ok(IdxState {
        state_token: state_token.to_string(),
        state_handle,
        remediation_options: response
            .remediation
            .map(|r| r.value.into_iter().map(RemediationStep::from).collect())
            .unwrap_or_default(),
        authenticators: response
            .authenticators
            .map(|a| a.value.into_iter().map(AuthenticatorDescriptor::from).collect())
            .unwrap_or_default(),
        current_authenticator: response
            .current_authenticator
            .or(response.current_authenticator_enrollment)
            .map(|a| a.value.into()),
        success: response.success,
        expires_at: response.expires_at,
    })
}

/// First `ERROR` message, top level first, then inside remediation forms.
fn first_error(response: &IdxResponse) -> Option<&IdxMessage> {
    if let Some(msg) = response
        .messages
        .as_ref()
        .and_then(|m| m.value.iter().find(|m| m.is_error()))
    {
        return Some(msg);
    }
    response
        .remediation
        .as_ref()?
        .value
        .iter()
        .find_map(|r| field_error(&r.value))
}

fn field_error(fields: &[FormField]) -> Option<&IdxMessage> {
    fields.iter().find_map(|f| {
        f.messages
            .as_ref()
            .and_then(|m| m.value.iter().find(|m| m.is_error()))
            .or_else(|| f.form.as_ref().and_then(|form| field_error(&form.value)))
    })
}
