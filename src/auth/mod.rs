//! Authentication for the dashboard.
//!
//! [`session::SessionManager`] owns the logged-in state and drives the login
//! and dashboard screens. It talks to the outside world through two seams:
//! [`provider::IdentityProvider`] (credentials, federated sign-in, the
//! auth-state stream) and [`provider::UserRecordSink`] (the one-time record
//! of a federated user). [`firebase::FirebaseRestProvider`] and
//! [`user_records::TomlUserRecords`] are the production implementations.

pub mod error;
pub mod firebase;
pub mod oauth;
pub mod provider;
pub mod session;
pub mod user_records;
pub mod validation;

pub use error::{AuthError, AuthErrorKind, SessionError, ValidationError};
pub use provider::{Identity, IdentityProvider, UserRecordSink};
pub use session::{SessionManager, SessionSettings, SessionState};
