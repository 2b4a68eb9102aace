//! Registro de ocorrências (avarias, faltas, divergências) via `CriarOcorrencia`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RecebError;
use crate::gateway::{Gateway, Transport};
use crate::model::Occurrence;
use crate::validation::{validate_occurrence_description, validate_required};

/// Divergência de um material, a ser registrada a partir de um modelo comum.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Divergence {
    pub material: String,
    pub quantidade: Option<f64>,
    /// Sobrescreve a descrição do modelo.
    pub descr: Option<String>,
    pub deposito: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOutcome {
    AllSucceeded,
    Partial,
    AllFailed,
    Empty,
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOutcome::AllSucceeded => write!(f, "todas registradas"),
            BatchOutcome::Partial => write!(f, "registro parcial"),
            BatchOutcome::AllFailed => write!(f, "nenhuma registrada"),
            BatchOutcome::Empty => write!(f, "nada a registrar"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialResult {
    pub material: String,
    /// `None` quando registrada.
    pub error: Option<String>,
}

impl MaterialResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub results: Vec<MaterialResult>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn outcome(&self) -> BatchOutcome {
        match (self.succeeded(), self.failed()) {
            (0, 0) => BatchOutcome::Empty,
            (_, 0) => BatchOutcome::AllSucceeded,
            (0, _) => BatchOutcome::AllFailed,
            _ => BatchOutcome::Partial,
        }
    }
}

pub struct OccurrenceRecorder<'a, T> {
    gateway: &'a Gateway<T>,
}

impl<'a, T: Transport> OccurrenceRecorder<'a, T> {
    pub fn new(gateway: &'a Gateway<T>) -> Self {
        Self { gateway }
    }

    /// Valida localmente e registra uma ocorrência.
    pub async fn record(&self, occurrence: &Occurrence) -> Result<(), RecebError> {
        validate_required(&[
            ("Nf", occurrence.nf.as_str()),
            ("Identificador", occurrence.identificador.as_str()),
            ("TipoOco", occurrence.tipo_oco.as_str()),
        ])
        .into_result("ocorrencia")?;
        validate_occurrence_description(&occurrence.descr).into_result("descricao")?;

        self.gateway.criar_ocorrencia(occurrence).await?;
        tracing::info!(
            nf = %occurrence.nf,
            identificador = %occurrence.identificador,
            tipo = %occurrence.tipo_oco,
            material = occurrence.material.as_deref().unwrap_or_default(),
            "occurrence recorded"
        );
        Ok(())
    }

    /// Uma chamada por material, em sequência. Uma falha não interrompe as demais.
    pub async fn record_divergences(
        &self,
        template: &Occurrence,
        divergences: &[Divergence],
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for divergence in divergences {
            let occurrence = Occurrence {
                material: Some(divergence.material.clone()),
                quantidade: divergence.quantidade.or(template.quantidade),
                descr: divergence
                    .descr
                    .clone()
                    .unwrap_or_else(|| template.descr.clone()),
                deposito: divergence.deposito.clone().or_else(|| template.deposito.clone()),
                ..template.clone()
            };
            let error = match self.record(&occurrence).await {
                Ok(()) => None,
                Err(err) => {
                    tracing::warn!(
                        nf = %occurrence.nf,
                        material = %divergence.material,
                        error = %err,
                        "divergence not recorded"
                    );
                    Some(err.to_string())
                }
            };
            summary.results.push(MaterialResult {
                material: divergence.material.clone(),
                error,
            });
        }
        summary
    }
}
