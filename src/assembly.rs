//! Montagem dos itens de uma UC.
//!
//! A lista local só guarda o que o backend aceitou: cada item entra de forma
//! otimista, é criado no `ItemsSet` e sai de novo se a criação falhar. Todos
//! os itens de uma UC têm o mesmo SKU, e a validade informada para o primeiro
//! item que a exige vale para os seguintes até ser limpa.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::context::ReceiptContext;
use crate::error::RecebError;
use crate::gateway::{Gateway, LookupMode, Transport};
use crate::model::{Item, MaterialInfo, UcStatus};
use crate::validation::{expiration_date, validate_barcode, validate_expiration, validate_quantity};

/// Confirmação do operador para operações destrutivas.
pub trait Confirmation {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirmation for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// UC onde os itens são gravados.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UcScope {
    pub nf: String,
    pub identificador: String,
    pub uc: String,
    pub mode: LookupMode,
}

impl UcScope {
    pub fn from_context(ctx: &ReceiptContext) -> Result<Self, RecebError> {
        Ok(Self {
            nf: ctx.require_nf()?.to_string(),
            identificador: ctx.require_identificador()?.to_string(),
            uc: ctx.require_uc()?.to_string(),
            mode: LookupMode::from_receb_emb(ctx.receb_emb),
        })
    }
}

/// O que o operador bipou ou digitou.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemInput {
    pub code: String,
    /// Sem quantidade, vale o `Qtd` do material.
    pub quantity: Option<String>,
    /// `(mês, ano)`.
    pub expiration: Option<(u32, i32)>,
}

impl ItemInput {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn quantity(mut self, quantity: impl Into<String>) -> Self {
        self.quantity = Some(quantity.into());
        self
    }

    pub fn expiration(mut self, month: u32, year: i32) -> Self {
        self.expiration = Some((month, year));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledItem {
    pub local_index: usize,
    /// Atribuído pelo backend; `None` só enquanto a criação está em andamento.
    pub item_uc: Option<String>,
    pub material: String,
    pub material13: String,
    pub material14: String,
    pub quantity: f64,
    pub expiration: Option<NaiveDate>,
    pub description: String,
}

impl AssembledItem {
    fn to_item(&self, scope: &UcScope) -> Item {
        Item {
            nf: scope.nf.clone(),
            uc: scope.uc.clone(),
            item_uc: self.item_uc.clone().unwrap_or_default(),
            identificador: scope.identificador.clone(),
            material: self.material.clone(),
            material13: self.material13.clone(),
            material14: self.material14.clone(),
            quantidade: self.quantity,
            data_validade: self.expiration,
            status_uc: UcStatus::EmAberto,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemAssembly {
    items: Vec<AssembledItem>,
    pinned_sku: Option<String>,
    pinned_expiration: Option<NaiveDate>,
    lookups: HashMap<String, MaterialInfo>,
    next_index: usize,
}

impl ItemAssembly {
    pub fn items(&self) -> &[AssembledItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pinned_sku(&self) -> Option<&str> {
        self.pinned_sku.as_deref()
    }

    pub fn pinned_expiration(&self) -> Option<NaiveDate> {
        self.pinned_expiration
    }

    pub fn total_quantity(&self) -> f64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Nova UC: lista, travas e cache de consultas zerados.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn clear_expiration(&mut self) {
        self.pinned_expiration = None;
    }

    /// Reconstrói a lista a partir dos itens já gravados no backend.
    pub fn restore(&mut self, items: Vec<Item>) {
        self.reset();
        for item in items {
            if self.pinned_sku.is_none() {
                self.pinned_sku = Some(item.material.clone());
            }
            if self.pinned_expiration.is_none() {
                self.pinned_expiration = item.data_validade;
            }
            let local_index = self.next_index;
            self.next_index += 1;
            self.items.push(AssembledItem {
                local_index,
                item_uc: Some(item.item_uc).filter(|v| !v.trim().is_empty()),
                material: item.material,
                material13: item.material13,
                material14: item.material14,
                quantity: item.quantidade,
                expiration: item.data_validade,
                description: String::new(),
            });
        }
    }

    async fn material<T: Transport>(
        &mut self,
        gateway: &Gateway<T>,
        code: &str,
        mode: LookupMode,
    ) -> Result<MaterialInfo, RecebError> {
        if let Some(info) = self.lookups.get(code) {
            return Ok(info.clone());
        }
        let info = gateway.lookup_material(code, mode).await?;
        self.lookups.insert(code.to_string(), info.clone());
        Ok(info)
    }

    fn resolve_quantity(input: Option<&str>, info: &MaterialInfo) -> Result<f64, RecebError> {
        // A quantidade padrão do material passa pelos mesmos limites da digitada.
        let raw = match input {
            Some(raw) => raw.to_string(),
            None if info.qtd > 0.0 => info.qtd.to_string(),
            None => return Err(RecebError::validation("quantidade", "Informe a quantidade")),
        };
        validate_quantity(&raw)
            .into_result("quantidade")?
            .parse::<f64>()
            .map_err(|_| RecebError::validation("quantidade", "Quantidade inválida"))
    }

    fn resolve_expiration(
        &self,
        input: Option<(u32, i32)>,
        info: &MaterialInfo,
    ) -> Result<Option<NaiveDate>, RecebError> {
        if !info.requires_expiration {
            return Ok(None);
        }
        let Some((month, year)) = input else {
            return match self.pinned_expiration {
                Some(date) => Ok(Some(date)),
                None => Err(RecebError::validation(
                    "validade",
                    format!("Material {} exige data de validade", info.material),
                )),
            };
        };
        validate_expiration(month, year).into_result("validade")?;
        let date = expiration_date(month, year)
            .ok_or_else(|| RecebError::validation("validade", "Data de validade inválida"))?;
        if let Some(pinned) = self.pinned_expiration
            && pinned != date
        {
            return Err(RecebError::validation(
                "validade",
                format!(
                    "Validade {} difere da já informada nesta UC ({})",
                    date.format("%m/%Y"),
                    pinned.format("%m/%Y")
                ),
            ));
        }
        Ok(Some(date))
    }

    /// Valida, consulta o material e cria o item no backend.
    ///
    /// Em qualquer falha a lista volta ao tamanho anterior.
    pub async fn add_item<T: Transport>(
        &mut self,
        gateway: &Gateway<T>,
        scope: &UcScope,
        input: ItemInput,
    ) -> Result<AssembledItem, RecebError> {
        let code = validate_barcode(&input.code).into_result("codigo")?;
        let info = self.material(gateway, &code, scope.mode).await?;

        if let Some(pinned) = &self.pinned_sku
            && *pinned != info.material
        {
            return Err(RecebError::validation(
                "material",
                format!(
                    "Material {} difere do SKU {} já bipado nesta UC",
                    info.material, pinned
                ),
            ));
        }

        let quantity = Self::resolve_quantity(input.quantity.as_deref(), &info)?;
        let expiration = self.resolve_expiration(input.expiration, &info)?;

        let local_index = self.next_index;
        self.next_index += 1;
        self.items.push(AssembledItem {
            local_index,
            item_uc: None,
            material: info.material.clone(),
            material13: info.material13.clone(),
            material14: info.material14.clone(),
            quantity,
            expiration,
            description: info.descricao.clone(),
        });
        let pending = self.items[self.items.len() - 1].to_item(scope);

        let item_uc = match gateway.create_item(&pending).await {
            Ok(created) if !created.item_uc.trim().is_empty() => created.item_uc,
            Ok(_) => {
                self.rollback(local_index);
                return Err(RecebError::business(
                    "Serviço não retornou o número do item criado",
                ));
            }
            Err(err) => {
                self.rollback(local_index);
                tracing::warn!(
                    nf = %scope.nf,
                    uc = %scope.uc,
                    material = %info.material,
                    error = %err,
                    "item rejected, local entry rolled back"
                );
                return Err(err);
            }
        };

        let Some(entry) = self.items.iter_mut().find(|i| i.local_index == local_index) else {
            return Err(RecebError::business("Item removido durante a criação"));
        };
        entry.item_uc = Some(item_uc);
        let entry = entry.clone();

        if self.pinned_sku.is_none() {
            self.pinned_sku = Some(info.material.clone());
        }
        if self.pinned_expiration.is_none() {
            self.pinned_expiration = expiration;
        }

        tracing::info!(
            nf = %scope.nf,
            uc = %scope.uc,
            material = %entry.material,
            item_uc = entry.item_uc.as_deref().unwrap_or_default(),
            quantity = entry.quantity,
            "item added"
        );
        Ok(entry)
    }

    fn rollback(&mut self, local_index: usize) {
        self.items.retain(|i| i.local_index != local_index);
    }

    /// Apaga no backend e, só depois, na lista local.
    pub async fn remove_item<T: Transport>(
        &mut self,
        gateway: &Gateway<T>,
        scope: &UcScope,
        position: usize,
        confirmation: &impl Confirmation,
    ) -> Result<AssembledItem, RecebError> {
        let Some(entry) = self.items.get(position) else {
            return Err(RecebError::validation(
                "item",
                format!("Item {} não existe nesta UC", position.saturating_add(1)),
            ));
        };
        if entry.item_uc.is_none() {
            return Err(RecebError::business("Item ainda não foi gravado no backend"));
        }

        let prompt = format!(
            "Remover item {} ({} x {})?",
            position.saturating_add(1),
            entry.material,
            entry.quantity
        );
        if !confirmation.confirm(&prompt) {
            return Err(RecebError::NotConfirmed);
        }

        gateway.delete_item(&entry.to_item(scope)).await?;

        let removed = self.items.remove(position);
        if self.items.is_empty() {
            self.pinned_sku = None;
            self.pinned_expiration = None;
        }
        tracing::info!(
            nf = %scope.nf,
            uc = %scope.uc,
            material = %removed.material,
            remaining = self.items.len(),
            "item removed"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Datelike, Local};
    use serde_json::json;

    use super::*;
    use crate::gateway::testing::ScriptedTransport;
    use crate::gateway::{CallOptions, GatewayError};

    fn gateway(transport: ScriptedTransport) -> Gateway<ScriptedTransport> {
        Gateway::new(transport).with_defaults(CallOptions {
            retry_delay: Duration::from_millis(1),
            ..CallOptions::default()
        })
    }

    fn scope() -> UcScope {
        UcScope {
            nf: "123".into(),
            identificador: "ABC".into(),
            uc: "U1".into(),
            mode: LookupMode::Barcode,
        }
    }

    fn next_year() -> i32 {
        Local::now().year() + 1
    }

    fn bad_request() -> GatewayError {
        GatewayError::Http {
            status: 400,
            message: "Quantidade acima do pedido".into(),
        }
    }

    #[tokio::test]
    async fn sku_pinning_rejects_without_mutation() {
        let gw = gateway(
            ScriptedTransport::new()
                .on("FN ValidarCodigoBarras", Ok(json!({"Material": "MAT-1"})))
                .on("FN ValidarCodigoBarras", Ok(json!({"Material": "MAT-2"})))
                .on("POST ItemsSet", Ok(json!({"ItemUc": "10"}))),
        );
        let mut assembly = ItemAssembly::default();

        assembly
            .add_item(&gw, &scope(), ItemInput::new("789100").quantity("2"))
            .await
            .unwrap();
        let before = assembly.items().to_vec();

        let err = assembly
            .add_item(&gw, &scope(), ItemInput::new("789200").quantity("1"))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("MAT-1") && message.contains("MAT-2"), "{message}");
        assert_eq!(assembly.items(), before.as_slice());
        assert_eq!(gw.transport().count("POST ItemsSet"), 1);
    }

    #[tokio::test]
    async fn failed_create_rolls_back_the_optimistic_entry() {
        let gw = gateway(
            ScriptedTransport::new()
                .always("FN ValidarCodigoBarras", Ok(json!({"Material": "MAT-1"})))
                .on("POST ItemsSet", Ok(json!({"ItemUc": "10"})))
                .on("POST ItemsSet", Err(bad_request())),
        );
        let mut assembly = ItemAssembly::default();
        assembly
            .add_item(&gw, &scope(), ItemInput::new("789100").quantity("1"))
            .await
            .unwrap();

        let len_before = assembly.len();
        let err = assembly
            .add_item(&gw, &scope(), ItemInput::new("789100").quantity("3"))
            .await
            .unwrap_err();

        assert!(matches!(err, RecebError::Gateway(_)));
        assert_eq!(assembly.len(), len_before);
        assert_eq!(assembly.items()[0].item_uc.as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn first_rejected_item_leaves_no_pins() {
        let gw = gateway(
            ScriptedTransport::new()
                .on("FN ValidarCodigoBarras", Ok(json!({"Material": "MAT-1"})))
                .on("POST ItemsSet", Err(bad_request())),
        );
        let mut assembly = ItemAssembly::default();
        assert!(
            assembly
                .add_item(&gw, &scope(), ItemInput::new("789100").quantity("1"))
                .await
                .is_err()
        );
        assert!(assembly.is_empty());
        assert_eq!(assembly.pinned_sku(), None);
    }

    #[tokio::test]
    async fn created_without_item_number_is_rolled_back() {
        let gw = gateway(
            ScriptedTransport::new()
                .on("FN ValidarCodigoBarras", Ok(json!({"Material": "MAT-1"})))
                .on("POST ItemsSet", Ok(json!({"ItemUc": ""}))),
        );
        let mut assembly = ItemAssembly::default();
        let err = assembly
            .add_item(&gw, &scope(), ItemInput::new("789100").quantity("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RecebError::Business(_)));
        assert!(assembly.is_empty());
    }

    #[tokio::test]
    async fn expiration_is_pinned_for_following_items() {
        let year = next_year();
        let gw = gateway(
            ScriptedTransport::new()
                .always(
                    "FN ValidarCodigoBarras",
                    Ok(json!({"Material": "MAT-1", "RequiresExpiration": "X"})),
                )
                .on("POST ItemsSet", Ok(json!({"ItemUc": "10"})))
                .on("POST ItemsSet", Ok(json!({"ItemUc": "20"}))),
        );
        let mut assembly = ItemAssembly::default();

        let first = assembly
            .add_item(
                &gw,
                &scope(),
                ItemInput::new("789100").quantity("1").expiration(6, year),
            )
            .await
            .unwrap();
        assert_eq!(first.expiration, NaiveDate::from_ymd_opt(year, 6, 30));

        let second = assembly
            .add_item(&gw, &scope(), ItemInput::new("789100").quantity("1"))
            .await
            .unwrap();
        assert_eq!(second.expiration, first.expiration);

        let err = assembly
            .add_item(
                &gw,
                &scope(),
                ItemInput::new("789100").quantity("1").expiration(7, year),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecebError::Validation { field: "validade", .. }));
        assert_eq!(assembly.len(), 2);

        // one lookup, then served from the cache
        assert_eq!(gw.transport().count("FN ValidarCodigoBarras"), 1);
    }

    #[tokio::test]
    async fn expiration_required_when_nothing_pinned() {
        let gw = gateway(ScriptedTransport::new().on(
            "FN ValidarCodigoBarras",
            Ok(json!({"Material": "MAT-1", "RequiresExpiration": "X"})),
        ));
        let mut assembly = ItemAssembly::default();
        let err = assembly
            .add_item(&gw, &scope(), ItemInput::new("789100").quantity("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RecebError::Validation { field: "validade", .. }));
        assert_eq!(gw.transport().count("POST ItemsSet"), 0);
    }

    #[tokio::test]
    async fn quantity_defaults_to_material_qtd() {
        let gw = gateway(
            ScriptedTransport::new()
                .on("FN ValidarMatnr", Ok(json!({"Material": "MAT-9", "Qtd": "24.000"})))
                .on("POST ItemsSet", Ok(json!({"ItemUc": "10"}))),
        );
        let mut assembly = ItemAssembly::default();
        let sku_scope = UcScope {
            mode: LookupMode::Sku,
            ..scope()
        };

        let item = assembly
            .add_item(&gw, &sku_scope, ItemInput::new("MAT-9"))
            .await
            .unwrap();
        assert_eq!(item.quantity, 24.0);
        let body = gw.transport().last_body("POST ItemsSet").unwrap();
        assert_eq!(body["Quantidade"], "24");
        assert_eq!(body["ItemUc"], "");
    }

    #[tokio::test]
    async fn default_quantity_above_limit_is_rejected() {
        let gw = gateway(
            ScriptedTransport::new()
                .on("FN ValidarMatnr", Ok(json!({"Material": "MAT-9", "Qtd": "1000000.000"}))),
        );
        let mut assembly = ItemAssembly::default();
        let sku_scope = UcScope {
            mode: LookupMode::Sku,
            ..scope()
        };

        let err = assembly
            .add_item(&gw, &sku_scope, ItemInput::new("MAT-9"))
            .await
            .unwrap_err();
        assert!(matches!(err, RecebError::Validation { field: "quantidade", .. }));
        assert!(assembly.is_empty());
        assert_eq!(gw.transport().count("POST ItemsSet"), 0);
    }

    #[tokio::test]
    async fn out_of_range_position_is_a_validation_error() {
        let gw = gateway(ScriptedTransport::new());
        let mut assembly = ItemAssembly::default();
        let err = assembly
            .remove_item(&gw, &scope(), usize::MAX, &|_: &str| true)
            .await
            .unwrap_err();
        assert!(matches!(err, RecebError::Validation { field: "item", .. }));
        assert!(gw.transport().requests().is_empty());
    }

    #[tokio::test]
    async fn invalid_quantity_never_reaches_the_backend() {
        let gw = gateway(
            ScriptedTransport::new().on("FN ValidarCodigoBarras", Ok(json!({"Material": "MAT-1"}))),
        );
        let mut assembly = ItemAssembly::default();
        let err = assembly
            .add_item(&gw, &scope(), ItemInput::new("789100").quantity("0"))
            .await
            .unwrap_err();
        assert!(matches!(err, RecebError::Validation { field: "quantidade", .. }));
        assert_eq!(gw.transport().count("POST ItemsSet"), 0);
    }

    #[tokio::test]
    async fn removal_needs_confirmation_and_resets_pins() {
        let gw = gateway(
            ScriptedTransport::new()
                .on("FN ValidarCodigoBarras", Ok(json!({"Material": "MAT-1"})))
                .on("POST ItemsSet", Ok(json!({"ItemUc": "10"}))),
        );
        let mut assembly = ItemAssembly::default();
        assembly
            .add_item(&gw, &scope(), ItemInput::new("789100").quantity("1"))
            .await
            .unwrap();

        let err = assembly
            .remove_item(&gw, &scope(), 0, &|_: &str| false)
            .await
            .unwrap_err();
        assert!(matches!(err, RecebError::NotConfirmed));
        assert_eq!(assembly.len(), 1);
        assert_eq!(gw.transport().requests().iter().filter(|r| r.route().starts_with("DELETE")).count(), 0);

        let removed = assembly
            .remove_item(&gw, &scope(), 0, &|_: &str| true)
            .await
            .unwrap();
        assert_eq!(removed.item_uc.as_deref(), Some("10"));
        assert!(assembly.is_empty());
        assert_eq!(assembly.pinned_sku(), None);
        assert_eq!(
            gw.transport()
                .count("DELETE ItemsSet(Nf='123',Uc='U1',ItemUc='10',Identificador='ABC')"),
            1
        );
    }

    #[tokio::test]
    async fn failed_remote_delete_keeps_the_item() {
        let gw = gateway(ScriptedTransport::new().on(
            "DELETE ItemsSet(Nf='123',Uc='U1',ItemUc='10',Identificador='ABC')",
            Err(bad_request()),
        ));
        let mut assembly = ItemAssembly::default();
        assembly.restore(vec![Item {
            nf: "123".into(),
            uc: "U1".into(),
            item_uc: "10".into(),
            identificador: "ABC".into(),
            material: "MAT-1".into(),
            material13: String::new(),
            material14: String::new(),
            quantidade: 1.0,
            data_validade: None,
            status_uc: UcStatus::EmAberto,
        }]);

        assert!(
            assembly
                .remove_item(&gw, &scope(), 0, &|_: &str| true)
                .await
                .is_err()
        );
        assert_eq!(assembly.len(), 1);
        assert_eq!(assembly.pinned_sku(), Some("MAT-1"));
    }

    #[test]
    fn restore_rebuilds_pins() {
        let date = NaiveDate::from_ymd_opt(2030, 1, 31);
        let item = |item_uc: &str, validade| Item {
            nf: "123".into(),
            uc: "U1".into(),
            item_uc: item_uc.into(),
            identificador: "ABC".into(),
            material: "MAT-1".into(),
            material13: String::new(),
            material14: String::new(),
            quantidade: 2.0,
            data_validade: validade,
            status_uc: UcStatus::EmAberto,
        };
        let mut assembly = ItemAssembly::default();
        assembly.restore(vec![item("10", None), item("20", date)]);

        assert_eq!(assembly.len(), 2);
        assert_eq!(assembly.pinned_sku(), Some("MAT-1"));
        assert_eq!(assembly.pinned_expiration(), date);
        assert_eq!(assembly.total_quantity(), 4.0);

        assembly.clear_expiration();
        assert_eq!(assembly.pinned_expiration(), None);
        assert_eq!(assembly.pinned_sku(), Some("MAT-1"));
    }
}
