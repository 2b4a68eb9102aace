use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use recebimento::assembly::ItemInput;
use recebimento::cli::{Cli, Command, ReceiptArgs, UcArgs, parse_divergence};
use recebimento::config::RecebConfig;
use recebimento::context::ReceiptContext;
use recebimento::gateway::{Gateway, HttpTransport};
use recebimento::model::Occurrence;
use recebimento::occurrence::Divergence;
use recebimento::orchestrator::{ReceivingOrchestrator, StorageProgress};
use recebimento::state_machine::ReceivingWorkflow;
use recebimento::ui::{self, BusySpinner, TerminalConfirmation};
use recebimento::validation::{parse_month_year, validate_expiration_input};
use recebimento::{Confirmation, logging};

type Orchestrator = ReceivingOrchestrator<HttpTransport>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            ui::print_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => RecebConfig::load_from(path)?,
        None => RecebConfig::load()?,
    };
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }

    let transport = HttpTransport::from_config(&config).context("criando cliente HTTP")?;
    let gateway = Gateway::new(transport)
        .with_defaults(config.call_options())
        .with_observer(Arc::new(BusySpinner::new()));
    let orch = ReceivingOrchestrator::new(gateway);
    let mut wf = ReceivingWorkflow::new(ReceiptContext::new(
        config.doca.clone(),
        config.impressora.clone(),
    ));
    tracing::debug!(workflow = %wf.id, url = %config.service_url, "session started");

    match cli.command {
        Command::Identificador { identificador } => {
            let nf = orch.resolve_identificador(&mut wf, &identificador).await?;
            ui::success(&format!("Identificador {identificador} → NF {nf}"));
        }
        Command::Montar { receipt, embalagem } => {
            let header = orch
                .open_header(&mut wf, &receipt.nf, &receipt.identificador)
                .await?;
            ui::info(&format!(
                "NF {} / {}: {:?}, recebimento {}",
                header.nf, header.identificador, header.operation_type, header.status_receb
            ));
            let uc = orch.create_uc(&mut wf, &embalagem).await?;
            ui::success(&format!("UC {uc} criada"));
        }
        Command::Item {
            uc,
            codigo,
            quantidade,
            validade,
            limpar_validade,
        } => {
            open_uc(&orch, &mut wf, &uc).await?;
            if limpar_validade {
                wf.context.scanned_items.clear_expiration();
                ui::info("Validade fixada na UC descartada");
            }
            let mut input = ItemInput::new(codigo);
            input.quantity = quantidade;
            if let Some(raw) = validade {
                validate_expiration_input(&raw).into_result("validade")?;
                if let Some((month, year)) = parse_month_year(&raw) {
                    input = input.expiration(month, year);
                }
            }
            let item = orch.add_item(&mut wf, input).await?;
            ui::success(&format!("{} x {} adicionado", item.material, item.quantity));
            ui::print_assembly(&wf.context.scanned_items);
        }
        Command::RemoverItem { uc, posicao, sim } => {
            open_uc(&orch, &mut wf, &uc).await?;
            if posicao == 0 {
                bail!("A posição começa em 1");
            }
            let removed = orch
                .remove_item(&mut wf, posicao - 1, &TerminalConfirmation { assume_yes: sim })
                .await?;
            ui::success(&format!("{} removido", removed.material));
            ui::print_assembly(&wf.context.scanned_items);
        }
        Command::ExcluirUc { uc, sim } => {
            open_uc(&orch, &mut wf, &uc).await?;
            orch.delete_uc(&mut wf, &TerminalConfirmation { assume_yes: sim })
                .await?;
            ui::success(&format!("UC {} excluída", uc.uc));
        }
        Command::ConcluirUc { uc } => {
            open_uc(&orch, &mut wf, &uc).await?;
            conclude(&orch, &mut wf).await?;
        }
        Command::Finalizar { receipt } => {
            orch.open_header(&mut wf, &receipt.nf, &receipt.identificador)
                .await?;
            let audit = orch.finalize_header(&mut wf).await?;
            ui::success(&format!("Container {} CONCLUIDO", audit.identificador));
            ui::print_audit(&audit);
        }
        Command::Armazenar { uc, posicao } => {
            store(&orch, &uc, posicao).await?;
        }
        Command::Ocorrencia {
            receipt,
            tipo,
            descricao,
            uc,
            material,
            quantidade,
            deposito,
        } => {
            let occurrence = Occurrence {
                uc,
                material,
                quantidade,
                deposito,
                ..template(&receipt, tipo, descricao)
            };
            orch.occurrences().record(&occurrence).await?;
            ui::success("Ocorrência registrada");
        }
        Command::Divergencias {
            receipt,
            tipo,
            descricao,
            materiais,
        } => {
            let divergences = materiais
                .iter()
                .map(|raw| {
                    parse_divergence(raw).map(|(material, quantidade)| Divergence {
                        material,
                        quantidade,
                        ..Divergence::default()
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(anyhow::Error::msg)?;
            let summary = orch
                .occurrences()
                .record_divergences(&template(&receipt, tipo, descricao), &divergences)
                .await;
            ui::print_batch(&summary);
            if summary.failed() > 0 {
                bail!("{} divergência(s) não registrada(s)", summary.failed());
            }
        }
    }

    Ok(())
}

fn template(receipt: &ReceiptArgs, tipo: String, descricao: String) -> Occurrence {
    Occurrence {
        nf: receipt.nf.clone(),
        identificador: receipt.identificador.clone(),
        tipo_oco: tipo,
        descr: descricao,
        ..Occurrence::default()
    }
}

/// Reabre cabeçalho e UC a partir do serviço.
async fn open_uc(orch: &Orchestrator, wf: &mut ReceivingWorkflow, args: &UcArgs) -> Result<()> {
    orch.open_header(wf, &args.receipt.nf, &args.receipt.identificador)
        .await?;
    let items = orch.resume_uc(wf, &args.uc).await?;
    tracing::debug!(uc = %args.uc, items, "uc reopened");
    Ok(())
}

async fn conclude(orch: &Orchestrator, wf: &mut ReceivingWorkflow) -> Result<()> {
    let confirmation = TerminalConfirmation { assume_yes: false };
    loop {
        match orch.complete_uc(wf).await {
            Ok(report) => {
                ui::success(&format!("UC {} concluída", report.uc));
                if !report.status_uc_updated {
                    ui::warning("StatusUC não encontrado; status não atualizado");
                }
                if let Some(label) = report.label
                    && let Err(err) = label.await
                {
                    tracing::warn!(error = %err, "label task did not finish");
                }
                return Ok(());
            }
            Err(failure) => {
                ui::print_completion_failure(&failure);
                if failure.can_retry() && confirmation.confirm("Tentar novamente?") {
                    continue;
                }
                orch.abandon(wf);
                return Err(failure.into());
            }
        }
    }
}

async fn store(orch: &Orchestrator, args: &UcArgs, posicao: Option<String>) -> Result<()> {
    let mut session = orch
        .open_storage(&args.receipt.nf, &args.receipt.identificador, &args.uc)
        .await?;
    let progress = orch.advance_storage(&mut session).await?;
    ui::print_storage(&progress);

    if let StorageProgress::AwaitingConfirmation { suggested_position } = progress {
        let selected = match posicao {
            Some(position) => position,
            None => ui::ask(&format!("Posição [{suggested_position}]")).unwrap_or(suggested_position),
        };
        if let Some(code) = orch.confirm_storage(&mut session, &selected).await? {
            ui::warning(&format!("Posição divergente registrada como {code}"));
        }
        ui::success(&format!("UC {} armazenada em {selected}", args.uc));
    }
    Ok(())
}
