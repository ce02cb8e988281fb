//! Okta Identity Engine (IDX) remediation protocol.

pub mod client;
pub mod remediation;
pub mod state;
pub mod types;

pub use client::IdxClient;
pub use remediation::{plan, Action, Phase, Secret};
pub use state::{
    interpret, AuthenticatorChoice, AuthenticatorDescriptor, FieldSpec, IdxState, OptionSpec,
    RemediationStep,
};
pub use types::{IdxResponse, SuccessLink};
