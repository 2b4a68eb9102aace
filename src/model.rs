//! Entidades do recebimento no formato do serviço OData.
//!
//! Os nomes de propriedade seguem o PascalCase do serviço (`Nf`, `StatusReceb`,
//! `Td1`...). Flags viajam como `"X"`/`""`, status como texto em maiúsculas
//! (`"EM ANDAMENTO"`), `Quantidade` como decimal em string e `DataValidade`
//! no formato `/Date(ms)/` do OData v2.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Tipo de operação do recebimento, decidido por `DeterminarOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OperationType {
    #[default]
    #[serde(rename = "NORMAL", alias = "")]
    Normal,
    #[serde(rename = "IMPORTACAO", alias = "IMPORTAÇÃO")]
    Importacao,
}

/// Status do recebimento e do container no cabeçalho.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReceiptStatus {
    #[default]
    #[serde(rename = "INICIAL", alias = "")]
    Inicial,
    #[serde(rename = "EM ANDAMENTO")]
    EmAndamento,
    #[serde(rename = "CONCLUIDO", alias = "CONCLUÍDO")]
    Concluido,
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiptStatus::Inicial => write!(f, "INICIAL"),
            ReceiptStatus::EmAndamento => write!(f, "EM ANDAMENTO"),
            ReceiptStatus::Concluido => write!(f, "CONCLUIDO"),
        }
    }
}

/// Status de uma UC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UcStatus {
    #[default]
    #[serde(rename = "EM ABERTO", alias = "")]
    EmAberto,
    #[serde(rename = "CONCLUIDO", alias = "CONCLUÍDO")]
    Concluido,
}

impl fmt::Display for UcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UcStatus::EmAberto => write!(f, "EM ABERTO"),
            UcStatus::Concluido => write!(f, "CONCLUIDO"),
        }
    }
}

/// Cabeçalho do recebimento, chave (Nf, Identificador).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReceiptHeader {
    pub nf: String,
    pub identificador: String,
    #[serde(rename = "Operacao", default)]
    pub operation_type: OperationType,
    #[serde(default)]
    pub status_receb: ReceiptStatus,
    #[serde(default)]
    pub status_container: ReceiptStatus,
    #[serde(default)]
    pub doca: String,
    #[serde(default, with = "flag")]
    pub receb_emb: bool,
}

/// Flags das tarefas de armazenagem. Só avançam de vazio para `"X"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TdFlags {
    #[serde(default, with = "flag")]
    pub td1: bool,
    #[serde(default, with = "flag")]
    pub td2: bool,
    #[serde(default, with = "flag")]
    pub conf_td2: bool,
}

impl TdFlags {
    pub fn td1_done() -> Self {
        Self {
            td1: true,
            td2: false,
            conf_td2: false,
        }
    }

    pub fn td2_done() -> Self {
        Self {
            td1: true,
            td2: true,
            conf_td2: false,
        }
    }

    pub fn stored() -> Self {
        Self {
            td1: true,
            td2: true,
            conf_td2: true,
        }
    }

    /// True when every flag set in `self` is also set in `next`.
    pub fn can_advance_to(&self, next: &TdFlags) -> bool {
        (!self.td1 || next.td1) && (!self.td2 || next.td2) && (!self.conf_td2 || next.conf_td2)
    }
}

impl fmt::Display for TdFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |b: bool| if b { "X" } else { "-" };
        write!(
            f,
            "Td1={} Td2={} ConfTd2={}",
            mark(self.td1),
            mark(self.td2),
            mark(self.conf_td2)
        )
    }
}

/// Chave de uma UC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UcKey {
    pub nf: String,
    pub identificador: String,
    pub uc: String,
}

impl fmt::Display for UcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UC {} (NF {}, {})", self.uc, self.nf, self.identificador)
    }
}

/// Registro de `StatusUCSet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnitOfLoad {
    pub nf: String,
    pub identificador: String,
    pub uc: String,
    #[serde(rename = "StatusUC", default)]
    pub status: UcStatus,
    #[serde(flatten)]
    pub td: TdFlags,
}

impl UnitOfLoad {
    pub fn key(&self) -> UcKey {
        UcKey {
            nf: self.nf.clone(),
            identificador: self.identificador.clone(),
            uc: self.uc.clone(),
        }
    }
}

/// Registro de `ItemsSet`. `item_uc` é sempre atribuído pelo backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub nf: String,
    pub uc: String,
    #[serde(default)]
    pub item_uc: String,
    pub identificador: String,
    pub material: String,
    #[serde(default)]
    pub material13: String,
    #[serde(default)]
    pub material14: String,
    #[serde(with = "decimal")]
    pub quantidade: f64,
    #[serde(default, with = "odata_date")]
    pub data_validade: Option<NaiveDate>,
    #[serde(default)]
    pub status_uc: UcStatus,
}

/// Metadados de material devolvidos por `ValidarCodigoBarras` / `ValidarMatnr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MaterialInfo {
    pub material: String,
    #[serde(default)]
    pub material13: String,
    #[serde(default)]
    pub material14: String,
    #[serde(default, alias = "Maktx")]
    pub descricao: String,
    #[serde(default, with = "flag")]
    pub requires_expiration: bool,
    /// Quantidade padrão por embalagem; 0 quando o serviço não informa.
    #[serde(default, with = "decimal")]
    pub qtd: f64,
}

/// Uma ocorrência a registrar via `CriarOcorrencia`. Não é persistida localmente.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Occurrence {
    pub nf: String,
    pub identificador: String,
    pub uc: Option<String>,
    pub material: Option<String>,
    pub quantidade: Option<f64>,
    pub tipo_oco: String,
    pub descr: String,
    pub deposito: Option<String>,
}

impl Occurrence {
    /// Parâmetros da function import, omitindo os campos opcionais ausentes.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("Nf", self.nf.clone()),
            ("Identificador", self.identificador.clone()),
        ];
        if let Some(uc) = &self.uc {
            params.push(("Uc", uc.clone()));
        }
        if let Some(material) = &self.material {
            params.push(("Material", material.clone()));
        }
        if let Some(q) = self.quantidade {
            params.push(("Quantidade", format_decimal(q)));
        }
        params.push(("TipoOco", self.tipo_oco.clone()));
        params.push(("Descr", self.descr.clone()));
        if let Some(deposito) = &self.deposito {
            params.push(("Deposito", deposito.clone()));
        }
        params
    }
}

/// Resultado padrão das function imports: `{Success, Message}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainReply {
    #[serde(default)]
    pub success: String,
    #[serde(default)]
    pub message: String,
}

impl DomainReply {
    pub fn is_success(&self) -> bool {
        self.success.trim().eq_ignore_ascii_case("x")
    }

    pub fn has_message(&self) -> bool {
        !self.message.trim().is_empty()
    }
}

/// Formata uma quantidade sem zeros desnecessários (`12`, `1.5`).
pub fn format_decimal(value: f64) -> String {
    format!("{value}")
}

/// Flags ABAP: `"X"` verdadeiro, vazio falso. Aceita também booleanos JSON.
pub mod flag {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "X" } else { "" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        struct FlagVisitor;

        impl Visitor<'_> for FlagVisitor {
            type Value = bool;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an ABAP flag (\"X\" or \"\") or a boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
                Ok(v.trim().eq_ignore_ascii_case("x"))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
                Ok(v)
            }

            fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
                Ok(false)
            }
        }

        deserializer.deserialize_any(FlagVisitor)
    }
}

/// `Edm.Decimal` trafega como string; aceita número também.
pub mod decimal {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_decimal(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        struct DecimalVisitor;

        impl Visitor<'_> for DecimalVisitor {
            type Value = f64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal as string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
                let v = v.trim();
                if v.is_empty() {
                    return Ok(0.0);
                }
                v.replace(',', ".")
                    .parse::<f64>()
                    .map_err(|_| E::custom(format!("invalid decimal: {v}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
                Ok(v)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
                Ok(0.0)
            }
        }

        deserializer.deserialize_any(DecimalVisitor)
    }
}

/// Datas `Edm.DateTime` do OData v2 (`/Date(1767139200000)/`).
///
/// Na leitura aceita também `YYYYMMDD` e `YYYY-MM-DD`; vazio e `null` viram `None`.
pub mod odata_date {
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDate>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => {
                let millis = date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp_millis())
                    .unwrap_or_default();
                serializer.serialize_str(&format!("/Date({millis})/"))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => parse(text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {text}"))),
        }
    }

    pub fn parse(text: &str) -> Option<NaiveDate> {
        if let Some(inner) = text.strip_prefix("/Date(").and_then(|t| t.strip_suffix(")/")) {
            // Pode vir com offset: /Date(1767139200000+0000)/
            let digits: String = inner
                .chars()
                .enumerate()
                .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
                .map(|(_, c)| c)
                .collect();
            let millis: i64 = digits.parse().ok()?;
            return DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive());
        }
        NaiveDate::parse_from_str(text, "%Y%m%d")
            .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
            .ok()
    }
}
