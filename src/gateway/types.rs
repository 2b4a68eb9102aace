//! Tipos de requisição, opções de chamada e pontos de extensão do gateway.
//!
//! [`ODataRequest`] descreve uma única operação contra o serviço remoto;
//! [`Transport`] executa uma tentativa dessa operação; [`CallOptions`]
//! controla retentativas, indicador de ocupado e apresentação de erros.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use super::error::GatewayError;

/// Método HTTP usado para chamar uma function import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionMethod {
    Get,
    Post,
}

/// Filtros para leituras de entity sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadParams {
    /// Pares `(propriedade, valor)` combinados com `and` em `$filter`.
    pub filters: Vec<(String, String)>,
}

impl ReadParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, value: &str) -> Self {
        self.filters.push((field.to_string(), value.to_string()));
        self
    }

    /// Monta a expressão `$filter` no formato OData v2 (`Nf eq '123' and Uc eq 'U1'`).
    pub fn filter_expression(&self) -> Option<String> {
        if self.filters.is_empty() {
            return None;
        }
        let clauses: Vec<String> = self
            .filters
            .iter()
            .map(|(field, value)| format!("{field} eq '{}'", escape_literal(value)))
            .collect();
        Some(clauses.join(" and "))
    }
}

/// Uma operação contra o serviço OData remoto.
#[derive(Debug, Clone, PartialEq)]
pub enum ODataRequest {
    Read { path: String, params: ReadParams },
    Create { set: String, data: Value },
    Update { path: String, data: Value },
    Delete { path: String },
    Function {
        name: String,
        params: Vec<(String, String)>,
        method: FunctionMethod,
    },
}

impl ODataRequest {
    /// Rótulo estável da operação, usado em logs e nos testes.
    pub fn route(&self) -> String {
        match self {
            ODataRequest::Read { path, .. } => format!("GET {path}"),
            ODataRequest::Create { set, .. } => format!("POST {set}"),
            ODataRequest::Update { path, .. } => format!("PATCH {path}"),
            ODataRequest::Delete { path } => format!("DELETE {path}"),
            ODataRequest::Function { name, .. } => format!("FN {name}"),
        }
    }

    /// Operações que alteram estado no servidor e exigem token CSRF.
    pub fn is_modifying(&self) -> bool {
        match self {
            ODataRequest::Read { .. } => false,
            ODataRequest::Function { method, .. } => *method == FunctionMethod::Post,
            _ => true,
        }
    }
}

impl fmt::Display for ODataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.route())
    }
}

/// Duplica apóstrofos, conforme a sintaxe de literais string do OData.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Literal de chave pronto para o caminho da URL: apóstrofos duplicados e
/// o restante percent-encoded (`#`, `?`, `/` e `%` não escapam do segmento).
fn path_literal(value: &str) -> String {
    escape_literal(value)
        .split('\'')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join("'")
}

/// Monta o caminho de uma entidade pela chave composta:
/// `HeaderSet(Nf='123',Identificador='ABC')`.
pub fn entity_path(set: &str, keys: &[(&str, &str)]) -> String {
    let keys: Vec<String> = keys
        .iter()
        .map(|(name, value)| format!("{name}='{}'", path_literal(value)))
        .collect();
    format!("{set}({})", keys.join(","))
}

/// Opções aplicadas a cada chamada do gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Retentativas após a primeira tentativa (total = `max_retries + 1`).
    pub max_retries: u32,
    /// Atraso base; a tentativa `n` espera `retry_delay * n`.
    pub retry_delay: Duration,
    /// Sinaliza o observador durante a chamada.
    pub show_busy: bool,
    /// Quando falso, a apresentação do erro fica a cargo do orquestrador.
    pub handle_error: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            show_busy: true,
            handle_error: true,
        }
    }
}

impl CallOptions {
    /// Backoff linear: `retry_delay * attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.retry_delay * attempt
    }

    /// Sem indicador de ocupado e sem apresentação de erro pelo gateway.
    pub fn silent(self) -> Self {
        Self {
            show_busy: false,
            handle_error: false,
            ..self
        }
    }

    pub fn without_retry(self) -> Self {
        Self {
            max_retries: 0,
            ..self
        }
    }
}

/// Executa uma única tentativa de uma [`ODataRequest`].
///
/// A implementação de produção é [`HttpTransport`](super::HttpTransport).
/// O payload devolvido já vem sem o envelope `d` do OData v2. Implementações
/// nunca retentam: isso é responsabilidade exclusiva do [`Gateway`](super::Gateway).
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &ODataRequest,
    ) -> impl Future<Output = Result<Value, GatewayError>> + Send;
}

/// Ganchos de apresentação acionados pelo gateway.
///
/// Todos os métodos têm implementação vazia; a CLI usa um spinner.
pub trait GatewayObserver: Send + Sync {
    fn busy_started(&self, _label: &str) {}

    fn busy_finished(&self) {}

    fn report_error(&self, _label: &str, _error: &GatewayError) {}
}

/// Observador que ignora todos os eventos.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl GatewayObserver for NoopObserver {}
