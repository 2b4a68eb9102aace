//! Configuração do recebimento carregada a partir de `recebimento.toml`.
//!
//! A struct [`RecebConfig`] contém o endereço do serviço OData, credenciais,
//! parâmetros de retentativa e os dados do posto (doca e impressora).
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis `RECEB_SERVICE_URL`, `RECEB_USER` e `RECEB_PASSWORD` têm
//! precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::gateway::CallOptions;

pub const CONFIG_FILE: &str = "recebimento.toml";

/// Configuração de nível superior carregada de `recebimento.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecebConfig {
    /// URL base do serviço, até o nome do serviço (`.../ZGW_RECEBIMENTO_SRV`).
    #[serde(default = "default_service_url")]
    pub service_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Retentativas após a primeira tentativa, para erros transitórios.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base em milissegundos; a tentativa `n` espera `n` vezes este valor.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Timeout de cada requisição HTTP, em segundos.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Doca do posto, gravada em cabeçalhos novos.
    #[serde(default)]
    pub doca: Option<String>,

    /// Impressora de etiquetas. Sem ela a etiqueta não é impressa.
    #[serde(default)]
    pub impressora: Option<String>,
}

// Valor padrão da URL do serviço: instância local.
fn default_service_url() -> String {
    "http://localhost:8000/sap/opu/odata/sap/ZGW_RECEBIMENTO_SRV".to_string()
}

// Valor padrão para retentativas máximas: 2.
fn default_max_retries() -> u32 {
    2
}

// Valor padrão para o atraso base: 1000ms.
fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for RecebConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            username: String::new(),
            password: String::new(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
            doca: None,
            impressora: None,
        }
    }
}

impl RecebConfig {
    /// Carrega a configuração de `recebimento.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega de um caminho explícito; arquivo ausente resulta nos defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("lendo {}", path.display()))?;
            toml::from_str::<RecebConfig>(&contents)
                .with_context(|| format!("interpretando {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Variáveis de ambiente não vazias sobrescrevem os valores do arquivo.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("RECEB_SERVICE_URL") {
            self.service_url = url;
        }
        if let Some(user) = non_empty("RECEB_USER") {
            self.username = user;
        }
        if let Some(password) = non_empty("RECEB_PASSWORD") {
            self.password = password;
        }
    }

    /// Opções padrão do gateway derivadas desta configuração.
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ..CallOptions::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn credentials(&self) -> Option<(String, String)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.clone(), self.password.clone()))
        }
    }
}
