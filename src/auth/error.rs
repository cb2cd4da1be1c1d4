//! Error taxonomy of the Session Manager.
//!
//! Provider failures are classified into [`AuthErrorKind`] before anything reaches
//! the user; each kind has exactly one message per operation. The raw provider
//! error travels along for logging only.

use thiserror::Error;

use super::provider::ProviderError;

/// Local input problems, detected before any provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Por favor, preencha todos os campos")]
    MissingFields,

    #[error("Por favor, insira seu email para recuperar a senha")]
    MissingEmail,

    #[error("Por favor, insira um email válido")]
    InvalidEmail,

    #[error("A senha deve ter pelo menos 6 caracteres.")]
    WeakPassword,

    #[error("As senhas não coincidem.")]
    PasswordMismatch,
}

/// The operation an error happened in; picks the wording of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOperation {
    Login,
    Register,
    ResetPassword,
    FederatedLogin,
    Logout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    InvalidEmail,
    InvalidCredentials,
    AccountDisabled,
    UserNotFound,
    TooManyRequests,
    NetworkFailure,
    EmailInUse,
    WeakPassword,
    PopupBlocked,
    PopupCancelled,
    UnauthorizedDomain,
    Unknown,
}

impl AuthErrorKind {
    /// Accepts codes with or without the `auth/` prefix.
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        let code = code.strip_prefix("auth/").unwrap_or(code);
        match code {
            "invalid-email" => AuthErrorKind::InvalidEmail,
            "wrong-password" | "invalid-credential" | "invalid-login-credentials" => {
                AuthErrorKind::InvalidCredentials
            }
            "user-disabled" => AuthErrorKind::AccountDisabled,
            "user-not-found" => AuthErrorKind::UserNotFound,
            "too-many-requests" => AuthErrorKind::TooManyRequests,
            "network-request-failed" => AuthErrorKind::NetworkFailure,
            "email-already-in-use" => AuthErrorKind::EmailInUse,
            "weak-password" => AuthErrorKind::WeakPassword,
            "popup-blocked" => AuthErrorKind::PopupBlocked,
            "popup-closed-by-user" | "cancelled-popup-request" => AuthErrorKind::PopupCancelled,
            "unauthorized-domain" => AuthErrorKind::UnauthorizedDomain,
            _ => AuthErrorKind::Unknown,
        }
    }

    /// Cancelling or unblocking a popup is a normal user decision.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthErrorKind::PopupBlocked | AuthErrorKind::PopupCancelled
        )
    }

    pub fn user_message(&self, operation: AuthOperation) -> &'static str {
        match (self, operation) {
            (AuthErrorKind::UserNotFound, AuthOperation::ResetPassword) => {
                "Nenhum usuário encontrado com este email."
            }
            (AuthErrorKind::UserNotFound, _) => "Usuário não encontrado.",
            (AuthErrorKind::InvalidEmail, _) => "Email inválido.",
            (AuthErrorKind::InvalidCredentials, _) => "Senha incorreta.",
            (AuthErrorKind::AccountDisabled, _) => "Esta conta foi desativada.",
            (AuthErrorKind::TooManyRequests, _) => {
                "Muitas tentativas falhas. Tente novamente mais tarde."
            }
            (AuthErrorKind::NetworkFailure, _) => "Erro de conexão. Verifique sua internet.",
            (AuthErrorKind::EmailInUse, _) => "Este email já está em uso.",
            (AuthErrorKind::WeakPassword, _) => "A senha deve ter pelo menos 6 caracteres.",
            (AuthErrorKind::PopupBlocked, _) => {
                "Popup bloqueado. Permita popups para este site e tente novamente."
            }
            (AuthErrorKind::PopupCancelled, _) => "Login cancelado.",
            (AuthErrorKind::UnauthorizedDomain, _) => "Domínio não autorizado para login.",
            (AuthErrorKind::Unknown, AuthOperation::Login) => {
                "Erro ao fazer login. Tente novamente."
            }
            (AuthErrorKind::Unknown, AuthOperation::Register) => {
                "Erro ao criar conta. Tente novamente."
            }
            (AuthErrorKind::Unknown, AuthOperation::ResetPassword) => {
                "Erro ao enviar email de recuperação."
            }
            (AuthErrorKind::Unknown, AuthOperation::FederatedLogin) => {
                "Erro ao fazer login com Google."
            }
            (AuthErrorKind::Unknown, AuthOperation::Logout) => "Erro ao fazer logout",
        }
    }
}

/// Classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", kind.user_message(*operation))]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub operation: AuthOperation,
    pub source: ProviderError,
}

impl AuthError {
    pub fn classify(operation: AuthOperation, source: ProviderError) -> Self {
        AuthError {
            kind: AuthErrorKind::from_code(&source.code),
            operation,
            source,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message(self.operation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] AuthError),
}
