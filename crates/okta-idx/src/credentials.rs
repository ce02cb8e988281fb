use std::fmt;

use crate::error::Result;
use crate::idx::AuthenticatorDescriptor;

/// Supplies the one-time code for an MFA challenge.
///
/// Called at most once per challenge, right before the answer is sent, so an
/// interactive implementation can prompt the user at that point.
pub trait PasscodeSource: Send + Sync {
    fn passcode(&self, authenticator: Option<&AuthenticatorDescriptor>) -> Result<String>;
}

impl<F> PasscodeSource for F
where
    F: Fn(Option<&AuthenticatorDescriptor>) -> Result<String> + Send + Sync,
{
    fn passcode(&self, authenticator: Option<&AuthenticatorDescriptor>) -> Result<String> {
        self(authenticator)
    }
}

/// A fixed code, e.g. passed on the command line.
pub struct StaticPasscode(pub String);

impl PasscodeSource for StaticPasscode {
    fn passcode(&self, _: Option<&AuthenticatorDescriptor>) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub struct Credentials {
    pub username: String,
    pub password: String,
    pub passcode: Box<dyn PasscodeSource>,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        passcode: impl PasscodeSource + 'static,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            passcode: Box::new(passcode),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}
