//! Tipos de erro da camada de acesso ao serviço OData remoto.
//!
//! Define [`GatewayError`] com variantes para falha de rede, tempo limite,
//! erros HTTP e respostas que não puderam ser interpretadas. A classificação
//! em [`ErrorKind`] e a decisão de retentativa vivem aqui, para que o
//! [`Gateway`](super::Gateway) seja o único ponto que decide retentar.

use thiserror::Error;

use crate::error::ErrorKind;

/// Erros que podem ocorrer em uma única tentativa de chamada ao serviço.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// Falha de rede sem resposta HTTP (status 0: DNS, conexão recusada, reset).
    #[error("network error: {0}")]
    Network(String),

    /// A requisição excedeu o tempo limite do cliente HTTP.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// O serviço respondeu com status fora da faixa 2xx.
    /// `message` já vem extraída do corpo de erro do SAP Gateway quando possível.
    #[error("service error (status {status}): {message}")]
    Http { status: u16, message: String },

    /// Corpo da resposta não corresponde ao formato esperado.
    #[error("invalid service response: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Status HTTP associado ao erro; 0 quando não houve resposta.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Http { status, .. } => *status,
            _ => 0,
        }
    }

    /// Falhas de rede, tempo limite, 5xx, 408 ou mensagem com assinatura de timeout.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Network(_) | GatewayError::Timeout(_) => true,
            GatewayError::Http { status, message } => {
                *status >= 500 || *status == 408 || mentions_timeout(message)
            }
            GatewayError::Parse(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Http { status: 404, .. })
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() {
            return ErrorKind::Transient;
        }
        match self {
            GatewayError::Http { status: 401 | 403, .. } => ErrorKind::Authorization,
            GatewayError::Http { status, .. } if (400..500).contains(status) => {
                ErrorKind::Business
            }
            _ => ErrorKind::Fatal,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_decode() {
            GatewayError::Parse(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Parse(err.to_string())
    }
}

fn mentions_timeout(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("timeout") || lower.contains("timed out") || lower.contains("tempo limite")
}

/// Extrai a mensagem legível de um corpo de erro OData.
///
/// O SAP Gateway responde `{"error":{"code":"...","message":{"lang":"pt","value":"..."}}}`;
/// outros serviços às vezes mandam `message` como string simples. Corpos que não
/// são JSON voltam aparados como vieram.
pub fn extract_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        let message = v.get("error")?.get("message")?;
        message
            .get("value")
            .and_then(|m| m.as_str())
            .or_else(|| message.as_str())
            .map(str::to_string)
    });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "unknown error".to_string(),
        None => body.trim().to_string(),
    }
}
