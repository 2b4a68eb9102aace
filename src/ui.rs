//! Interface de terminal do recebimento: spinner, saída colorida e confirmações.
//!
//! Usa `indicatif` para o indicador de ocupado durante as chamadas remotas e
//! `console` para cores e leitura de respostas do operador.

use std::sync::Mutex;
use std::time::Duration;

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};

use crate::assembly::{AssembledItem, Confirmation, ItemAssembly};
use crate::error::{ErrorKind, RecebError};
use crate::gateway::{GatewayError, GatewayObserver};
use crate::occurrence::{BatchOutcome, BatchSummary};
use crate::orchestrator::{CompletionFailure, RecoveryAction, StorageProgress};
use crate::state_machine::WorkflowAudit;

/// Spinner exibido enquanto o gateway aguarda o serviço.
///
/// Erros marcados para tratamento pelo gateway são impressos em vermelho.
pub struct BusySpinner {
    // Spinner ativo, se houver chamada em andamento.
    active: Mutex<Option<ProgressBar>>,
    red: Style,
}

impl BusySpinner {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            red: Style::new().red().bold(),
        }
    }
}

impl Default for BusySpinner {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayObserver for BusySpinner {
    fn busy_started(&self, label: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut active) = self.active.lock()
            && let Some(previous) = active.replace(pb)
        {
            previous.finish_and_clear();
        }
    }

    fn busy_finished(&self) {
        if let Ok(mut active) = self.active.lock()
            && let Some(pb) = active.take()
        {
            pb.finish_and_clear();
        }
    }

    fn report_error(&self, label: &str, error: &GatewayError) {
        eprintln!("  {} {label}: {error}", self.red.apply_to("✗"));
    }
}

/// Pergunta sim/não no terminal. Com `assume_yes` não pergunta.
pub struct TerminalConfirmation {
    pub assume_yes: bool,
}

impl Confirmation for TerminalConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        let term = Term::stderr();
        if term.write_str(&format!("{prompt} [s/N] ")).is_err() {
            return false;
        }
        match term.read_line() {
            Ok(answer) => matches!(answer.trim().to_lowercase().as_str(), "s" | "sim" | "y" | "yes"),
            Err(_) => false,
        }
    }
}

/// Lê uma linha do operador (posição de armazenagem, por exemplo).
pub fn ask(prompt: &str) -> Option<String> {
    let term = Term::stderr();
    term.write_str(&format!("{prompt}: ")).ok()?;
    term.read_line()
        .ok()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

pub fn success(message: &str) {
    println!("  {} {message}", Style::new().green().bold().apply_to("✓"));
}

pub fn info(message: &str) {
    println!("  {} {message}", Style::new().cyan().apply_to("ℹ"));
}

pub fn warning(message: &str) {
    println!("  {} {message}", Style::new().yellow().apply_to("!"));
}

pub fn failure(message: &str) {
    println!("  {} {message}", Style::new().red().bold().apply_to("✗"));
}

/// Orientação ao operador conforme a classe do erro.
pub fn error_hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Validation => Some("corrija a entrada e repita o comando"),
        ErrorKind::Authorization => Some("verifique usuário e senha do serviço"),
        ErrorKind::Transient => Some("serviço indisponível, tente novamente em instantes"),
        ErrorKind::Business | ErrorKind::Fatal => None,
    }
}

/// Mensagem final de um comando que falhou.
pub fn print_error(err: &anyhow::Error) {
    if let Some(completion) = err.downcast_ref::<CompletionFailure>() {
        failure(&format!(
            "[{}] UC não concluída ({})",
            completion.error.kind(),
            completion.step
        ));
        return;
    }
    let Some(receb) = err.downcast_ref::<RecebError>() else {
        failure(&format!("{err:#}"));
        return;
    };
    let kind = receb.kind();
    failure(&format!("[{kind}] {receb}"));
    if let Some(hint) = error_hint(kind) {
        println!("    {}", Style::new().dim().apply_to(hint));
    }
}

pub fn print_items(items: &[AssembledItem]) {
    let dim = Style::new().dim();
    for (position, item) in items.iter().enumerate() {
        let validade = item
            .expiration
            .map(|d| d.format("%m/%Y").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:>3}. {} x {} {} {}",
            position + 1,
            item.material,
            item.quantity,
            dim.apply_to(format!("validade {validade}")),
            dim.apply_to(item.item_uc.as_deref().unwrap_or("?"))
        );
    }
}

/// Lista os itens da UC com o total.
pub fn print_assembly(assembly: &ItemAssembly) {
    print_items(assembly.items());
    println!(
        "  {}",
        Style::new().bold().apply_to(format!(
            "{} item(ns), total {}",
            assembly.len(),
            assembly.total_quantity()
        ))
    );
}

pub fn print_completion_failure(failure: &CompletionFailure) {
    self::failure(&failure.to_string());
    let actions: Vec<&str> = failure
        .recovery
        .iter()
        .map(|action| match action {
            RecoveryAction::Retry => "tentar novamente",
            RecoveryAction::AbandonToMenu => "voltar ao menu",
        })
        .collect();
    println!("    {}", Style::new().dim().apply_to(actions.join(" | ")));
}

pub fn print_storage(progress: &StorageProgress) {
    match progress {
        StorageProgress::AlreadyStored => success("UC já armazenada"),
        StorageProgress::NoPendingTask => info("Nenhuma tarefa pendente para esta UC"),
        StorageProgress::AwaitingConfirmation { suggested_position } => {
            info(&format!("Posição sugerida: {suggested_position}"))
        }
    }
}

pub fn print_batch(summary: &BatchSummary) {
    for result in &summary.results {
        match &result.error {
            None => success(&result.material),
            Some(error) => failure(&format!("{}: {error}", result.material)),
        }
    }
    let line = format!(
        "{} ({} ok, {} com erro)",
        summary.outcome(),
        summary.succeeded(),
        summary.failed()
    );
    match summary.outcome() {
        BatchOutcome::AllSucceeded => success(&line),
        BatchOutcome::Partial => warning(&line),
        BatchOutcome::AllFailed => failure(&line),
        BatchOutcome::Empty => info(&line),
    }
}

/// Imprime o resumo da sessão em JSON.
pub fn print_audit(audit: &WorkflowAudit) {
    println!();
    println!("{}", Style::new().green().apply_to("─── Resumo do recebimento ───"));
    println!("{}", serde_json::to_string_pretty(audit).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assume_yes_skips_the_prompt() {
        let confirmation = TerminalConfirmation { assume_yes: true };
        assert!(confirmation.confirm("Remover item 1?"));
    }

    #[test]
    fn hints_only_for_actionable_kinds() {
        assert!(error_hint(ErrorKind::Transient).is_some());
        assert!(error_hint(ErrorKind::Authorization).is_some());
        assert!(error_hint(ErrorKind::Business).is_none());
        let err = RecebError::validation("quantidade", "Quantidade inválida");
        assert_eq!(error_hint(err.kind()), error_hint(ErrorKind::Validation));
    }

    #[test]
    fn spinner_lifecycle_is_balanced() {
        let spinner = BusySpinner::new();
        spinner.busy_started("FN CriarUC");
        spinner.busy_started("FN ConcluirUC");
        spinner.busy_finished();
        spinner.busy_finished();
        assert!(spinner.active.lock().unwrap().is_none());
    }
}
