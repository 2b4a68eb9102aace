use thiserror::Error;

use crate::gateway::GatewayError;
use crate::state_machine::{ReceivingEvent, ReceivingState};

#[derive(Debug, Error)]
pub enum RecebError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{0}")]
    Business(String),

    #[error("Container {identificador} da NF {nf} já está CONCLUIDO")]
    ContainerConcluded { nf: String, identificador: String },

    #[error("Contexto do recebimento sem {0}")]
    MissingContext(&'static str),

    #[error("Transição inválida: {event} a partir de {from}")]
    InvalidTransition {
        from: ReceivingState,
        event: ReceivingEvent,
    },

    #[error("Operação cancelada pelo operador")]
    NotConfirmed,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl RecebError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        RecebError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn business(message: impl Into<String>) -> Self {
        RecebError::Business(message.into())
    }

    /// Classifies the error for presentation (see `ui::print_error`).
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecebError::Validation { .. } | RecebError::NotConfirmed => ErrorKind::Validation,
            RecebError::Business(_)
            | RecebError::ContainerConcluded { .. }
            | RecebError::MissingContext(_)
            | RecebError::InvalidTransition { .. } => ErrorKind::Business,
            RecebError::Gateway(err) => err.kind(),
        }
    }
}

/// Classifies a failure for retry and presentation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Local input failure; never reaches the network.
    Validation,
    /// Backend refused the operation (2xx with `Message`, or a documented 4xx).
    Business,
    /// 401/403.
    Authorization,
    /// Network failure, timeout or 5xx. Retried by the gateway.
    Transient,
    /// Anything else, surfaced verbatim.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "Validation"),
            ErrorKind::Business => write!(f, "Business"),
            ErrorKind::Authorization => write!(f, "Authorization"),
            ErrorKind::Transient => write!(f, "Transient"),
            ErrorKind::Fatal => write!(f, "Fatal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_names_field() {
        let err = RecebError::validation("quantidade", "deve ser maior que zero");
        assert_eq!(err.to_string(), "quantidade: deve ser maior que zero");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn gateway_errors_keep_their_classification() {
        let err: RecebError = GatewayError::Http {
            status: 503,
            message: "Service Unavailable".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Transient);

        let err: RecebError = GatewayError::Http {
            status: 403,
            message: "Forbidden".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn container_concluded_is_business() {
        let err = RecebError::ContainerConcluded {
            nf: "123".into(),
            identificador: "ABC".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Business);
        assert!(err.to_string().contains("ABC"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RecebError>();
    }
}
