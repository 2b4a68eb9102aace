//! Contexto do recebimento em andamento.
//!
//! Um único dono: o [`ReceivingWorkflow`](crate::state_machine::ReceivingWorkflow)
//! da sessão. Nada aqui é persistido; ao reiniciar o processo o operador
//! retoma pelo identificador e a UC é recarregada do serviço.

use serde::{Deserialize, Serialize};

use crate::assembly::ItemAssembly;
use crate::error::RecebError;
use crate::model::{OperationType, ReceiptHeader, ReceiptStatus, UcKey};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptContext {
    pub nf: Option<String>,
    pub identificador: Option<String>,
    pub doca: Option<String>,
    pub impressora: Option<String>,
    pub uc: Option<String>,
    pub operacao: Option<OperationType>,
    pub status_receb: Option<ReceiptStatus>,
    pub status_container: Option<ReceiptStatus>,
    /// `RecebEmb` do cabeçalho: consulta de material por SKU em vez de código de barras.
    pub receb_emb: bool,
    pub scanned_items: ItemAssembly,
}

impl ReceiptContext {
    pub fn new(doca: Option<String>, impressora: Option<String>) -> Self {
        Self {
            doca,
            impressora,
            ..Self::default()
        }
    }

    /// Copia os dados do cabeçalho lido ou criado.
    pub fn apply_header(&mut self, header: &ReceiptHeader) {
        self.nf = Some(header.nf.clone());
        self.identificador = Some(header.identificador.clone());
        self.operacao = Some(header.operation_type);
        self.status_receb = Some(header.status_receb);
        self.status_container = Some(header.status_container);
        self.receb_emb = header.receb_emb;
        if !header.doca.trim().is_empty() {
            self.doca = Some(header.doca.clone());
        }
    }

    /// Limpa a UC e os itens bipados, mantendo o cabeçalho.
    pub fn clear_uc_scope(&mut self) {
        self.uc = None;
        self.scanned_items.reset();
    }

    /// Limpa tudo que pertence ao recebimento; doca e impressora ficam.
    pub fn clear_receipt_scope(&mut self) {
        self.clear_uc_scope();
        self.nf = None;
        self.identificador = None;
        self.operacao = None;
        self.status_receb = None;
        self.status_container = None;
        self.receb_emb = false;
    }

    pub fn clear_all(&mut self) {
        self.clear_receipt_scope();
        self.doca = None;
        self.impressora = None;
    }

    pub fn require_nf(&self) -> Result<&str, RecebError> {
        require(&self.nf, "NF")
    }

    pub fn require_identificador(&self) -> Result<&str, RecebError> {
        require(&self.identificador, "Identificador")
    }

    pub fn require_uc(&self) -> Result<&str, RecebError> {
        require(&self.uc, "UC")
    }

    pub fn uc_key(&self) -> Result<UcKey, RecebError> {
        Ok(UcKey {
            nf: self.require_nf()?.to_string(),
            identificador: self.require_identificador()?.to_string(),
            uc: self.require_uc()?.to_string(),
        })
    }
}

fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, RecebError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(RecebError::MissingContext(name))
}
