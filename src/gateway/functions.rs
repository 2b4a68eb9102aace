//! Chamadas tipadas às function imports e entity sets do serviço de recebimento.
//!
//! Cada helper monta a requisição, delega ao [`Gateway`] (que cuida de
//! retentativas) e converte o payload nas entidades de [`crate::model`].
//! Respostas 2xx com `Message` preenchida viram [`RecebError::Business`].

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::error::GatewayError;
use super::remote::Gateway;
use super::types::{CallOptions, FunctionMethod, ReadParams, Transport, entity_path};
use crate::error::RecebError;
use crate::model::{
    DomainReply, Item, MaterialInfo, Occurrence, OperationType, ReceiptHeader, ReceiptStatus,
    TdFlags, UcKey, UcStatus, UnitOfLoad,
};

pub const HEADER_SET: &str = "HeaderSet";
pub const STATUS_UC_SET: &str = "StatusUCSet";
pub const ITEMS_SET: &str = "ItemsSet";

/// Código de exceção enviado quando a posição confirmada difere da sugerida.
pub const POSITION_EXCEPTION_CODE: &str = "CHBD";

pub fn header_path(nf: &str, identificador: &str) -> String {
    entity_path(HEADER_SET, &[("Nf", nf), ("Identificador", identificador)])
}

pub fn status_uc_path(key: &UcKey) -> String {
    entity_path(
        STATUS_UC_SET,
        &[
            ("Nf", key.nf.as_str()),
            ("Identificador", key.identificador.as_str()),
            ("Uc", key.uc.as_str()),
        ],
    )
}

pub fn item_path(nf: &str, uc: &str, item_uc: &str, identificador: &str) -> String {
    entity_path(
        ITEMS_SET,
        &[
            ("Nf", nf),
            ("Uc", uc),
            ("ItemUc", item_uc),
            ("Identificador", identificador),
        ],
    )
}

/// Modo de consulta de material, selecionado pela flag `RecebEmb` do cabeçalho.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// Código de barras (EAN-13/DUN-14) via `ValidarCodigoBarras`.
    Barcode,
    /// SKU digitado diretamente via `ValidarMatnr`.
    Sku,
}

impl LookupMode {
    pub fn from_receb_emb(receb_emb: bool) -> Self {
        if receb_emb {
            LookupMode::Sku
        } else {
            LookupMode::Barcode
        }
    }
}

/// Etapa de criação de tarefa de armazenagem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdTask {
    Td1,
    Td2,
}

impl TdTask {
    pub fn function_name(&self) -> &'static str {
        match self {
            TdTask::Td1 => "CreateTD1",
            TdTask::Td2 => "CreateTD2",
        }
    }
}

/// Resultado de `DeterminarOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationInfo {
    pub operation_type: OperationType,
    pub receb_emb: bool,
}

/// Function imports às vezes embrulham o resultado no próprio nome:
/// `{"CriarUC": {"Uc": "..."}}`.
pub fn function_result(name: &str, value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key(name) => {
            map.remove(name).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Normaliza coleção (`{"results": [...]}`), array, objeto único ou nulo em linhas.
pub fn rows(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => vec![Value::Object(map)],
        },
        other => vec![other],
    }
}

fn parse<D: DeserializeOwned>(value: Value) -> Result<D, RecebError> {
    serde_json::from_value(value).map_err(|e| RecebError::Gateway(GatewayError::from(e)))
}

fn reply(name: &str, value: Value) -> Result<DomainReply, RecebError> {
    let value = function_result(name, value);
    match rows(value).into_iter().next() {
        Some(row) => parse(row),
        None => Ok(DomainReply::default()),
    }
}

fn ensure_no_message(reply: DomainReply) -> Result<DomainReply, RecebError> {
    if reply.has_message() {
        Err(RecebError::business(reply.message.trim()))
    } else {
        Ok(reply)
    }
}

fn ensure_success(reply: DomainReply, fallback: &str) -> Result<DomainReply, RecebError> {
    if reply.is_success() {
        Ok(reply)
    } else if reply.has_message() {
        Err(RecebError::business(reply.message.trim()))
    } else {
        Err(RecebError::business(fallback))
    }
}

fn string_field(row: &Value, field: &str) -> Option<String> {
    row.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl<T: Transport> Gateway<T> {
    /// `ValidIdentificador`: resolve a NF de um identificador de container.
    pub async fn valid_identificador(&self, identificador: &str) -> Result<String, RecebError> {
        let name = "ValidIdentificador";
        let value = self
            .call_function(
                name,
                &[("Identificador", identificador)],
                FunctionMethod::Get,
                self.defaults(),
            )
            .await?;
        let row = rows(function_result(name, value)).into_iter().next();
        row.as_ref()
            .and_then(|r| string_field(r, "Nf"))
            .ok_or_else(|| {
                RecebError::business(format!(
                    "Identificador {identificador} não possui NF vinculada"
                ))
            })
    }

    /// `DeterminarOP`: linhas no resultado indicam importação.
    pub async fn determinar_op(
        &self,
        nf: &str,
        identificador: &str,
    ) -> Result<OperationInfo, RecebError> {
        let name = "DeterminarOP";
        let value = self
            .call_function(
                name,
                &[("Nf", nf), ("Identificador", identificador)],
                FunctionMethod::Post,
                self.defaults(),
            )
            .await?;
        let rows = rows(function_result(name, value));
        let receb_emb = rows
            .first()
            .and_then(|r| string_field(r, "RecebEmb"))
            .is_some_and(|v| v.eq_ignore_ascii_case("x"));
        let operation_type = if rows.is_empty() {
            OperationType::Normal
        } else {
            OperationType::Importacao
        };
        Ok(OperationInfo {
            operation_type,
            receb_emb,
        })
    }

    /// Lê o cabeçalho; `None` quando o serviço responde 404.
    pub async fn read_header(
        &self,
        nf: &str,
        identificador: &str,
    ) -> Result<Option<ReceiptHeader>, RecebError> {
        let opts = CallOptions {
            handle_error: false,
            ..self.defaults()
        };
        match self
            .read(&header_path(nf, identificador), ReadParams::new(), opts)
            .await
        {
            Ok(value) => Ok(Some(parse(value)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn create_header(&self, header: &ReceiptHeader) -> Result<ReceiptHeader, RecebError> {
        let data = serde_json::to_value(header).map_err(GatewayError::from)?;
        let created = self.create(HEADER_SET, data, self.defaults()).await?;
        if created.is_null() {
            return Ok(header.clone());
        }
        parse(created)
    }

    /// Atualiza o status do container e, opcionalmente, o do recebimento.
    pub async fn update_header_status(
        &self,
        nf: &str,
        identificador: &str,
        status_container: ReceiptStatus,
        status_receb: Option<ReceiptStatus>,
        opts: CallOptions,
    ) -> Result<(), RecebError> {
        let mut data = json!({ "StatusContainer": status_container });
        if let Some(status) = status_receb {
            data["StatusReceb"] = json!(status);
        }
        self.update(&header_path(nf, identificador), data, opts)
            .await?;
        Ok(())
    }

    /// `CriarUC`: devolve o número da UC criada.
    pub async fn criar_uc(
        &self,
        mat_embalagem: &str,
        nf: &str,
        identificador: &str,
    ) -> Result<String, RecebError> {
        let name = "CriarUC";
        let value = self
            .call_function(
                name,
                &[
                    ("MatEmbalagem", mat_embalagem),
                    ("Nf", nf),
                    ("Identificador", identificador),
                ],
                FunctionMethod::Post,
                self.defaults(),
            )
            .await?;
        let row = rows(function_result(name, value)).into_iter().next();
        if let Some(message) = row.as_ref().and_then(|r| string_field(r, "Message")) {
            return Err(RecebError::business(message));
        }
        row.as_ref()
            .and_then(|r| string_field(r, "Uc"))
            .ok_or_else(|| RecebError::business("Serviço não retornou o número da UC"))
    }

    pub async fn concluir_uc(&self, key: &UcKey, opts: CallOptions) -> Result<Value, RecebError> {
        let value = self
            .call_function(
                "ConcluirUC",
                &[
                    ("Uc", key.uc.as_str()),
                    ("Nf", key.nf.as_str()),
                    ("Identificador", key.identificador.as_str()),
                ],
                FunctionMethod::Post,
                opts,
            )
            .await?;
        Ok(value)
    }

    pub async fn deletar_uc(&self, uc: &str) -> Result<(), RecebError> {
        let name = "DeletarUC";
        let value = self
            .call_function(name, &[("Uc", uc)], FunctionMethod::Post, self.defaults())
            .await?;
        ensure_no_message(reply(name, value)?)?;
        Ok(())
    }

    pub async fn read_status_uc(&self, key: &UcKey) -> Result<Option<UnitOfLoad>, RecebError> {
        let opts = CallOptions {
            handle_error: false,
            ..self.defaults()
        };
        match self.read(&status_uc_path(key), ReadParams::new(), opts).await {
            Ok(value) => Ok(Some(parse(value)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Grava as três flags de TD em uma única atualização.
    pub async fn update_td_flags(&self, key: &UcKey, flags: TdFlags) -> Result<(), RecebError> {
        let data = serde_json::to_value(flags).map_err(GatewayError::from)?;
        self.update(&status_uc_path(key), data, self.defaults())
            .await?;
        Ok(())
    }

    /// Atualização tolerante do status da UC; `false` quando o registro não existe.
    pub async fn set_uc_status(&self, key: &UcKey, status: UcStatus) -> Result<bool, RecebError> {
        let updated = self
            .update_tolerant(
                &status_uc_path(key),
                json!({ "StatusUC": status }),
                self.defaults(),
            )
            .await?;
        Ok(updated)
    }

    /// `CreateTD1` / `CreateTD2`: sucesso exige `Success = "X"`.
    pub async fn create_td(&self, task: TdTask, key: &UcKey) -> Result<DomainReply, RecebError> {
        let name = task.function_name();
        let value = self
            .call_function(
                name,
                &[
                    ("UC", key.uc.as_str()),
                    ("NF", key.nf.as_str()),
                    ("Identificador", key.identificador.as_str()),
                ],
                FunctionMethod::Post,
                self.defaults(),
            )
            .await?;
        ensure_success(reply(name, value)?, &format!("Falha ao executar {name}"))
    }

    /// `GetSuggestedPosition`: `None` quando não há tarefa pendente.
    pub async fn suggested_position(&self, uc: &str) -> Result<Option<String>, RecebError> {
        let name = "GetSuggestedPosition";
        let value = self
            .call_function(name, &[("UC", uc)], FunctionMethod::Get, self.defaults())
            .await?;
        Ok(rows(function_result(name, value))
            .first()
            .and_then(|r| string_field(r, "SuggestedPosition")))
    }

    pub async fn confirm_to_confirm(
        &self,
        selected_position: &str,
        exception_code: &str,
        uc: &str,
    ) -> Result<DomainReply, RecebError> {
        let name = "ConfirmToConfirm";
        let value = self
            .call_function(
                name,
                &[
                    ("SelectedPosition", selected_position),
                    ("ExceptionCode", exception_code),
                    ("UC", uc),
                ],
                FunctionMethod::Post,
                self.defaults(),
            )
            .await?;
        ensure_success(reply(name, value)?, "Falha ao confirmar a posição")
    }

    /// `FinalizaReceb`: sucesso somente se `Message` vier vazia.
    pub async fn finaliza_receb(
        &self,
        nf: &str,
        identificador: &str,
        uc: Option<&str>,
        opts: CallOptions,
    ) -> Result<(), RecebError> {
        let name = "FinalizaReceb";
        let mut params = vec![("Nf", nf), ("Identificador", identificador)];
        if let Some(uc) = uc {
            params.push(("Uc", uc));
        }
        let value = self
            .call_function(name, &params, FunctionMethod::Post, opts)
            .await?;
        ensure_no_message(reply(name, value)?)?;
        Ok(())
    }

    pub async fn criar_ocorrencia(&self, occurrence: &Occurrence) -> Result<(), RecebError> {
        let name = "CriarOcorrencia";
        let owned = occurrence.params();
        let params: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let value = self
            .call_function(name, &params, FunctionMethod::Post, self.defaults())
            .await?;
        ensure_no_message(reply(name, value)?)?;
        Ok(())
    }

    /// `ImprimirEtiqueta`, sempre silenciosa e sem retentativa.
    pub async fn imprimir_etiqueta(&self, uc: &str, impressora: &str) -> Result<(), RecebError> {
        self.call_function(
            "ImprimirEtiqueta",
            &[("UC", uc), ("Impressora", impressora)],
            FunctionMethod::Post,
            self.defaults().silent().without_retry(),
        )
        .await?;
        Ok(())
    }

    pub async fn lookup_material(
        &self,
        code: &str,
        mode: LookupMode,
    ) -> Result<MaterialInfo, RecebError> {
        let (name, param) = match mode {
            LookupMode::Barcode => ("ValidarCodigoBarras", "CodigoBarras"),
            LookupMode::Sku => ("ValidarMatnr", "Matnr"),
        };
        let value = self
            .call_function(name, &[(param, code)], FunctionMethod::Get, self.defaults())
            .await?;
        let row = rows(function_result(name, value))
            .into_iter()
            .next()
            .ok_or_else(|| RecebError::business(format!("Material {code} não encontrado")))?;
        if let Some(message) = string_field(&row, "Message") {
            return Err(RecebError::business(message));
        }
        let info: MaterialInfo = parse(row)?;
        if info.material.trim().is_empty() {
            return Err(RecebError::business(format!("Material {code} não encontrado")));
        }
        Ok(info)
    }

    pub async fn read_items(&self, nf: &str, uc: &str) -> Result<Vec<Item>, RecebError> {
        let value = self
            .read(
                ITEMS_SET,
                ReadParams::new().filter("Nf", nf).filter("Uc", uc),
                self.defaults(),
            )
            .await?;
        rows(value).into_iter().map(parse).collect()
    }

    pub async fn create_item(&self, item: &Item) -> Result<Item, RecebError> {
        let data = serde_json::to_value(item).map_err(GatewayError::from)?;
        let created = self.create(ITEMS_SET, data, self.defaults()).await?;
        parse(created)
    }

    pub async fn delete_item(&self, item: &Item) -> Result<(), RecebError> {
        let path = item_path(&item.nf, &item.uc, &item.item_uc, &item.identificador);
        self.delete(&path, self.defaults()).await?;
        Ok(())
    }
}
