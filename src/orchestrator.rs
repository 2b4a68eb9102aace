use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::assembly::{AssembledItem, Confirmation, ItemInput, UcScope};
use crate::error::RecebError;
use crate::gateway::{CallOptions, Gateway, POSITION_EXCEPTION_CODE, TdTask, Transport};
use crate::model::{Occurrence, ReceiptHeader, ReceiptStatus, TdFlags, UcKey, UcStatus};
use crate::occurrence::OccurrenceRecorder;
use crate::state_machine::{
    ReceivingEvent, ReceivingStateMachine, ReceivingWorkflow, StorageStep, WorkflowAudit,
    determine_next_step, flags_after,
};
use crate::validation::{validate_identificador, validate_required};

/// What the operator may do after a failed UC completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Run [`ReceivingOrchestrator::complete_uc`] again from the first step.
    Retry,
    /// Drop the workflow context and go back to the main menu.
    AbandonToMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStep {
    Preconditions,
    ConcluirUc,
    HeaderInProgress,
    FinalizaReceb,
}

impl fmt::Display for CompletionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStep::Preconditions => write!(f, "pré-condições"),
            CompletionStep::ConcluirUc => write!(f, "ConcluirUC"),
            CompletionStep::HeaderInProgress => write!(f, "status EM ANDAMENTO"),
            CompletionStep::FinalizaReceb => write!(f, "FinalizaReceb"),
        }
    }
}

#[derive(Debug, Error)]
#[error("Falha ao concluir UC em {step}: {error}")]
pub struct CompletionFailure {
    pub step: CompletionStep,
    #[source]
    pub error: RecebError,
    pub recovery: Vec<RecoveryAction>,
}

impl CompletionFailure {
    fn at(step: CompletionStep, error: RecebError) -> Self {
        let recovery = match step {
            CompletionStep::Preconditions => vec![RecoveryAction::AbandonToMenu],
            _ => vec![RecoveryAction::Retry, RecoveryAction::AbandonToMenu],
        };
        Self {
            step,
            error,
            recovery,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.recovery.contains(&RecoveryAction::Retry)
    }
}

#[derive(Debug)]
pub struct CompletionReport {
    pub uc: String,
    /// `false` when the StatusUC record was missing and the update was skipped.
    pub status_uc_updated: bool,
    /// Background label print. Never carries an error.
    pub label: Option<JoinHandle<()>>,
}

/// Storage of one UC, from TD1 creation to position confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSession {
    pub key: UcKey,
    pub flags: TdFlags,
    pub suggested_position: Option<String>,
}

impl StorageSession {
    pub fn next_step(&self) -> StorageStep {
        determine_next_step(self.flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProgress {
    AlreadyStored,
    /// No task waiting for confirmation. Informational.
    NoPendingTask,
    AwaitingConfirmation { suggested_position: String },
}

/// Drives a [`ReceivingWorkflow`] through header, UC, item and storage steps.
///
/// Every remote call goes through the shared [`Gateway`].
pub struct ReceivingOrchestrator<T> {
    gateway: Arc<Gateway<T>>,
}

impl<T: Transport + 'static> ReceivingOrchestrator<T> {
    pub fn new(gateway: Gateway<T>) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }

    pub fn gateway(&self) -> &Gateway<T> {
        &self.gateway
    }

    pub fn occurrences(&self) -> OccurrenceRecorder<'_, T> {
        OccurrenceRecorder::new(self.gateway())
    }

    /// `ValidIdentificador`: fills NF and Identificador in the context.
    pub async fn resolve_identificador(
        &self,
        workflow: &mut ReceivingWorkflow,
        identificador: &str,
    ) -> Result<String, RecebError> {
        ReceivingStateMachine::ensure(workflow, ReceivingEvent::HeaderOpened)?;
        let identificador = validate_identificador(identificador).into_result("identificador")?;
        let nf = self.gateway.valid_identificador(&identificador).await?;

        let ctx = &mut workflow.context;
        if ctx.identificador.as_deref() != Some(identificador.as_str()) {
            ctx.clear_receipt_scope();
        }
        ctx.nf = Some(nf.clone());
        ctx.identificador = Some(identificador);
        tracing::info!(%nf, "identificador resolved");
        Ok(nf)
    }

    /// Opens the Header for `(nf, identificador)`, creating it when missing.
    ///
    /// A new Header takes its operation type and `RecebEmb` from `DeterminarOP`.
    pub async fn open_header(
        &self,
        workflow: &mut ReceivingWorkflow,
        nf: &str,
        identificador: &str,
    ) -> Result<ReceiptHeader, RecebError> {
        ReceivingStateMachine::ensure(workflow, ReceivingEvent::HeaderOpened)?;
        validate_required(&[("NF", nf)]).into_result("nf")?;
        let identificador = validate_identificador(identificador).into_result("identificador")?;
        let nf = nf.trim();

        let header = match self.gateway.read_header(nf, &identificador).await? {
            Some(header) => {
                if header.status_container == ReceiptStatus::Concluido {
                    return Err(RecebError::ContainerConcluded {
                        nf: nf.to_string(),
                        identificador,
                    });
                }
                tracing::info!(%nf, %identificador, status = %header.status_receb, "header found");
                header
            }
            None => {
                let op = self.gateway.determinar_op(nf, &identificador).await?;
                let header = ReceiptHeader {
                    nf: nf.to_string(),
                    identificador: identificador.clone(),
                    operation_type: op.operation_type,
                    status_receb: ReceiptStatus::Inicial,
                    status_container: ReceiptStatus::Inicial,
                    doca: workflow.context.doca.clone().unwrap_or_default(),
                    receb_emb: op.receb_emb,
                };
                let created = self.gateway.create_header(&header).await?;
                tracing::info!(
                    %nf,
                    %identificador,
                    operation = ?created.operation_type,
                    receb_emb = created.receb_emb,
                    "header created"
                );
                created
            }
        };

        let ctx = &mut workflow.context;
        if ctx.nf.as_deref() != Some(nf) || ctx.identificador.as_deref() != Some(identificador.as_str()) {
            ctx.clear_receipt_scope();
        }
        ctx.apply_header(&header);
        ReceivingStateMachine::apply(workflow, ReceivingEvent::HeaderOpened)?;
        Ok(header)
    }

    fn ensure_container_open(workflow: &ReceivingWorkflow) -> Result<(), RecebError> {
        let ctx = &workflow.context;
        if ctx.status_container == Some(ReceiptStatus::Concluido) {
            return Err(RecebError::ContainerConcluded {
                nf: ctx.nf.clone().unwrap_or_default(),
                identificador: ctx.identificador.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// `CriarUC` with the packaging material.
    pub async fn create_uc(
        &self,
        workflow: &mut ReceivingWorkflow,
        mat_embalagem: &str,
    ) -> Result<String, RecebError> {
        ReceivingStateMachine::ensure(workflow, ReceivingEvent::UcCreated)?;
        Self::ensure_container_open(workflow)?;
        validate_required(&[("Material de embalagem", mat_embalagem)])
            .into_result("mat_embalagem")?;
        let nf = workflow.context.require_nf()?.to_string();
        let identificador = workflow.context.require_identificador()?.to_string();

        let uc = self
            .gateway
            .criar_uc(mat_embalagem.trim(), &nf, &identificador)
            .await?;

        workflow.context.clear_uc_scope();
        workflow.context.uc = Some(uc.clone());
        ReceivingStateMachine::apply(workflow, ReceivingEvent::UcCreated)?;
        tracing::info!(%nf, %identificador, %uc, "uc created");
        Ok(uc)
    }

    /// Reopens a UC still EM ABERTO and reloads its items from `ItemsSet`.
    pub async fn resume_uc(
        &self,
        workflow: &mut ReceivingWorkflow,
        uc: &str,
    ) -> Result<usize, RecebError> {
        ReceivingStateMachine::ensure(workflow, ReceivingEvent::UcResumed { items: 0 })?;
        Self::ensure_container_open(workflow)?;
        validate_required(&[("UC", uc)]).into_result("uc")?;
        let key = UcKey {
            nf: workflow.context.require_nf()?.to_string(),
            identificador: workflow.context.require_identificador()?.to_string(),
            uc: uc.trim().to_string(),
        };

        let Some(status) = self.gateway.read_status_uc(&key).await? else {
            return Err(RecebError::business(format!("{key} não encontrada")));
        };
        if status.status == UcStatus::Concluido {
            return Err(RecebError::business(format!("{key} já está CONCLUIDO")));
        }
        let items = self.gateway.read_items(&key.nf, &key.uc).await?;
        let count = items.len();

        workflow.context.clear_uc_scope();
        workflow.context.uc = Some(key.uc.clone());
        workflow.context.scanned_items.restore(items);
        ReceivingStateMachine::apply(workflow, ReceivingEvent::UcResumed { items: count })?;
        tracing::info!(nf = %key.nf, uc = %key.uc, items = count, "uc resumed");
        Ok(count)
    }

    pub async fn add_item(
        &self,
        workflow: &mut ReceivingWorkflow,
        input: ItemInput,
    ) -> Result<AssembledItem, RecebError> {
        ReceivingStateMachine::ensure(workflow, ReceivingEvent::ItemAdded)?;
        Self::ensure_container_open(workflow)?;
        let scope = UcScope::from_context(&workflow.context)?;

        let item = workflow
            .context
            .scanned_items
            .add_item(self.gateway(), &scope, input)
            .await?;
        ReceivingStateMachine::apply(workflow, ReceivingEvent::ItemAdded)?;
        Ok(item)
    }

    /// `position` is the 0-based position in the current item list.
    pub async fn remove_item(
        &self,
        workflow: &mut ReceivingWorkflow,
        position: usize,
        confirmation: &impl Confirmation,
    ) -> Result<AssembledItem, RecebError> {
        ReceivingStateMachine::ensure(workflow, ReceivingEvent::ItemsEmptied)?;
        let scope = UcScope::from_context(&workflow.context)?;

        let removed = workflow
            .context
            .scanned_items
            .remove_item(self.gateway(), &scope, position, confirmation)
            .await?;
        if workflow.context.scanned_items.is_empty() {
            ReceivingStateMachine::apply(workflow, ReceivingEvent::ItemsEmptied)?;
        }
        Ok(removed)
    }

    /// `DeletarUC`, only for a UC EM ABERTO without items.
    pub async fn delete_uc(
        &self,
        workflow: &mut ReceivingWorkflow,
        confirmation: &impl Confirmation,
    ) -> Result<(), RecebError> {
        ReceivingStateMachine::ensure(workflow, ReceivingEvent::UcDeleted)?;
        let key = workflow.context.uc_key()?;

        if let Some(status) = self.gateway.read_status_uc(&key).await?
            && status.status != UcStatus::EmAberto
        {
            return Err(RecebError::business(format!(
                "{key} está {} e não pode ser excluída",
                status.status
            )));
        }
        if !self.gateway.read_items(&key.nf, &key.uc).await?.is_empty() {
            return Err(RecebError::business(format!("{key} possui itens")));
        }
        if !confirmation.confirm(&format!("Excluir a UC {}?", key.uc)) {
            return Err(RecebError::NotConfirmed);
        }

        self.gateway.deletar_uc(&key.uc).await?;
        workflow.context.clear_uc_scope();
        ReceivingStateMachine::apply(workflow, ReceivingEvent::UcDeleted)?;
        tracing::info!(nf = %key.nf, uc = %key.uc, "uc deleted");
        Ok(())
    }

    /// Concludes the current UC.
    ///
    /// Steps: `ConcluirUC`, Header EM ANDAMENTO, `FinalizaReceb`, tolerant
    /// StatusUC=CONCLUIDO, background label print. A failure in the first three
    /// leaves the workflow in UC_CONCLUDING; calling this again restarts at step one.
    pub async fn complete_uc(
        &self,
        workflow: &mut ReceivingWorkflow,
    ) -> Result<CompletionReport, CompletionFailure> {
        let key = workflow
            .context
            .uc_key()
            .map_err(|e| CompletionFailure::at(CompletionStep::Preconditions, e))?;
        ReceivingStateMachine::apply(workflow, ReceivingEvent::CompletionStarted)
            .map_err(|e| CompletionFailure::at(CompletionStep::Preconditions, e))?;

        // Falhas dos passos 1 a 3 voltam como CompletionFailure; quem chama as apresenta.
        let opts = CallOptions {
            handle_error: false,
            ..self.gateway.defaults()
        };

        self.gateway
            .concluir_uc(&key, opts)
            .await
            .map_err(|e| CompletionFailure::at(CompletionStep::ConcluirUc, e))?;

        self.gateway
            .update_header_status(
                &key.nf,
                &key.identificador,
                ReceiptStatus::EmAndamento,
                Some(ReceiptStatus::EmAndamento),
                opts,
            )
            .await
            .map_err(|e| CompletionFailure::at(CompletionStep::HeaderInProgress, e))?;
        workflow.context.status_container = Some(ReceiptStatus::EmAndamento);
        workflow.context.status_receb = Some(ReceiptStatus::EmAndamento);

        self.gateway
            .finaliza_receb(
                &key.nf,
                &key.identificador,
                Some(key.uc.as_str()),
                opts,
            )
            .await
            .map_err(|e| CompletionFailure::at(CompletionStep::FinalizaReceb, e))?;

        let status_uc_updated = match self.gateway.set_uc_status(&key, UcStatus::Concluido).await {
            Ok(updated) => updated,
            Err(err) => {
                tracing::warn!(uc = %key.uc, error = %err, "StatusUC not updated");
                false
            }
        };

        let label = self.print_label(&key.uc, workflow.context.impressora.as_deref());

        ReceivingStateMachine::apply(workflow, ReceivingEvent::UcConcluded)
            .map_err(|e| CompletionFailure::at(CompletionStep::Preconditions, e))?;
        workflow.ucs_concluded.push(key.uc.clone());
        workflow.context.clear_uc_scope();
        tracing::info!(nf = %key.nf, uc = %key.uc, "uc concluded");

        Ok(CompletionReport {
            uc: key.uc,
            status_uc_updated,
            label,
        })
    }

    fn print_label(&self, uc: &str, impressora: Option<&str>) -> Option<JoinHandle<()>> {
        let Some(impressora) = impressora.map(str::trim).filter(|p| !p.is_empty()) else {
            tracing::debug!(%uc, "no printer configured, label skipped");
            return None;
        };
        let gateway = Arc::clone(&self.gateway);
        let uc = uc.to_string();
        let impressora = impressora.to_string();
        Some(tokio::spawn(async move {
            match gateway.imprimir_etiqueta(&uc, &impressora).await {
                Ok(()) => tracing::info!(%uc, %impressora, "label printed"),
                Err(err) => tracing::warn!(%uc, %impressora, error = %err, "label print failed"),
            }
        }))
    }

    /// Leaves the workflow. All context is dropped.
    pub fn abandon(&self, workflow: &mut ReceivingWorkflow) {
        workflow.context.clear_all();
        // Abandoned is legal from every state.
        let _ = ReceivingStateMachine::apply(workflow, ReceivingEvent::Abandoned);
        tracing::info!(workflow = %workflow.id, "workflow abandoned");
    }

    /// Closes the Header for good. Requires StatusContainer EM ANDAMENTO.
    pub async fn finalize_header(
        &self,
        workflow: &mut ReceivingWorkflow,
    ) -> Result<WorkflowAudit, RecebError> {
        ReceivingStateMachine::ensure(workflow, ReceivingEvent::HeaderFinalized)?;
        let nf = workflow.context.require_nf()?.to_string();
        let identificador = workflow.context.require_identificador()?.to_string();

        let Some(header) = self.gateway.read_header(&nf, &identificador).await? else {
            return Err(RecebError::business(format!(
                "Cabeçalho da NF {nf} / {identificador} não encontrado"
            )));
        };
        if header.status_container != ReceiptStatus::EmAndamento {
            return Err(RecebError::business(format!(
                "Container deve estar EM ANDAMENTO para finalizar (atual: {})",
                header.status_container
            )));
        }

        self.gateway
            .update_header_status(
                &nf,
                &identificador,
                ReceiptStatus::Concluido,
                None,
                self.gateway.defaults(),
            )
            .await?;
        workflow.context.status_container = Some(ReceiptStatus::Concluido);
        ReceivingStateMachine::apply(workflow, ReceivingEvent::HeaderFinalized)?;

        let audit = WorkflowAudit::from_workflow(workflow);
        workflow.context.clear_all();
        tracing::info!(
            %nf,
            %identificador,
            ucs = audit.ucs_concluded.len(),
            duration_ms = audit.duration_ms,
            "header finalized"
        );
        Ok(audit)
    }

    /// Starts storage for a UC. The Header container must be CONCLUIDO.
    pub async fn open_storage(
        &self,
        nf: &str,
        identificador: &str,
        uc: &str,
    ) -> Result<StorageSession, RecebError> {
        validate_required(&[("NF", nf), ("Identificador", identificador), ("UC", uc)])
            .into_result("armazenagem")?;
        let key = UcKey {
            nf: nf.trim().to_string(),
            identificador: identificador.trim().to_string(),
            uc: uc.trim().to_string(),
        };

        let Some(header) = self.gateway.read_header(&key.nf, &key.identificador).await? else {
            return Err(RecebError::business(format!(
                "Cabeçalho da NF {} / {} não encontrado",
                key.nf, key.identificador
            )));
        };
        if header.status_container != ReceiptStatus::Concluido {
            return Err(RecebError::business(format!(
                "Container {} ainda não está CONCLUIDO (atual: {})",
                key.identificador, header.status_container
            )));
        }

        let Some(status) = self.gateway.read_status_uc(&key).await? else {
            return Err(RecebError::business(format!("{key} não encontrada")));
        };
        tracing::debug!(uc = %key.uc, flags = %status.td, "storage opened");
        Ok(StorageSession {
            key,
            flags: status.td,
            suggested_position: None,
        })
    }

    /// Runs TD creation steps until confirmation is needed.
    ///
    /// TD1 chains into TD2 without re-reading the UC. Session flags move only
    /// after the remote flag write succeeded.
    pub async fn advance_storage(
        &self,
        session: &mut StorageSession,
    ) -> Result<StorageProgress, RecebError> {
        loop {
            let step = session.next_step();
            tracing::debug!(uc = %session.key.uc, %step, "storage step");
            let task = match step {
                StorageStep::AlreadyStored => return Ok(StorageProgress::AlreadyStored),
                StorageStep::Inconsistent(flags) => {
                    return Err(RecebError::business(format!(
                        "{} com flags de armazenagem inconsistentes ({flags})",
                        session.key
                    )));
                }
                StorageStep::ToConfirm => {
                    return match self.gateway.suggested_position(&session.key.uc).await? {
                        Some(position) => {
                            session.suggested_position = Some(position.clone());
                            Ok(StorageProgress::AwaitingConfirmation {
                                suggested_position: position,
                            })
                        }
                        None => {
                            session.suggested_position = None;
                            tracing::info!(uc = %session.key.uc, "no pending storage task");
                            Ok(StorageProgress::NoPendingTask)
                        }
                    };
                }
                StorageStep::CreateTd1 => TdTask::Td1,
                StorageStep::CreateTd2 => TdTask::Td2,
            };

            self.gateway.create_td(task, &session.key).await?;
            let Some(next) = flags_after(step) else {
                return Err(RecebError::business(format!("Etapa {step} sem flags")));
            };
            self.gateway.update_td_flags(&session.key, next).await?;
            session.flags = next;
            tracing::info!(uc = %session.key.uc, task = task.function_name(), "storage task created");
        }
    }

    /// Confirms the storage position.
    ///
    /// A position other than the suggested one records a `CHBD` occurrence
    /// first and sends `CHBD` as exception code. Returns that code, if any.
    pub async fn confirm_storage(
        &self,
        session: &mut StorageSession,
        selected_position: &str,
    ) -> Result<Option<&'static str>, RecebError> {
        if session.next_step() != StorageStep::ToConfirm {
            return Err(RecebError::business(format!(
                "{} não aguarda confirmação ({})",
                session.key,
                session.next_step()
            )));
        }
        let selected = validate_required(&[("Posição", selected_position)])
            .into_result("posicao")
            .map(|_| selected_position.trim().to_string())?;
        let Some(suggested) = session.suggested_position.clone() else {
            return Err(RecebError::business(
                "Nenhuma posição sugerida para esta UC",
            ));
        };

        let exception = if selected != suggested {
            let occurrence = Occurrence {
                nf: session.key.nf.clone(),
                identificador: session.key.identificador.clone(),
                uc: Some(session.key.uc.clone()),
                tipo_oco: POSITION_EXCEPTION_CODE.to_string(),
                descr: format!("Posição {selected} informada no lugar de {suggested}"),
                ..Default::default()
            };
            self.occurrences().record(&occurrence).await?;
            Some(POSITION_EXCEPTION_CODE)
        } else {
            None
        };

        self.gateway
            .confirm_to_confirm(&selected, exception.unwrap_or_default(), &session.key.uc)
            .await?;
        let stored = TdFlags::stored();
        self.gateway.update_td_flags(&session.key, stored).await?;
        session.flags = stored;
        tracing::info!(
            uc = %session.key.uc,
            position = %selected,
            exception = exception.unwrap_or_default(),
            "storage confirmed"
        );
        Ok(exception)
    }
}
