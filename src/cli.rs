//! Interface de linha de comando do recebimento baseada em clap.
//!
//! Cada subcomando reconstrói o contexto necessário (cabeçalho e UC) a partir
//! do serviço e executa uma etapa do fluxo na doca.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Recebimento físico de mercadorias: cabeçalho, UCs, itens e armazenagem.
#[derive(Debug, Parser)]
#[command(name = "recebimento", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: ./recebimento.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de retentativas em erros transitórios.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// NF e identificador do container.
#[derive(Debug, Clone, Args)]
pub struct ReceiptArgs {
    #[arg(long)]
    pub nf: String,

    #[arg(long)]
    pub identificador: String,
}

#[derive(Debug, Clone, Args)]
pub struct UcArgs {
    #[command(flatten)]
    pub receipt: ReceiptArgs,

    #[arg(long)]
    pub uc: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve a NF vinculada a um identificador de container.
    Identificador { identificador: String },

    /// Abre (ou cria) o cabeçalho e cria uma nova UC.
    Montar {
        #[command(flatten)]
        receipt: ReceiptArgs,

        /// Material de embalagem da UC.
        #[arg(long)]
        embalagem: String,
    },

    /// Adiciona um item bipado à UC.
    Item {
        #[command(flatten)]
        uc: UcArgs,

        /// Código de barras ou SKU, conforme o cabeçalho.
        codigo: String,

        /// Quantidade; sem ela vale a quantidade padrão do material.
        #[arg(long)]
        quantidade: Option<String>,

        /// Validade no formato MM/AAAA.
        #[arg(long)]
        validade: Option<String>,

        /// Descarta a validade já fixada na UC antes de adicionar o item.
        #[arg(long, default_value_t = false)]
        limpar_validade: bool,
    },

    /// Remove um item da UC (posição começando em 1).
    RemoverItem {
        #[command(flatten)]
        uc: UcArgs,

        posicao: usize,

        /// Não pede confirmação.
        #[arg(long, default_value_t = false)]
        sim: bool,
    },

    /// Exclui uma UC vazia.
    ExcluirUc {
        #[command(flatten)]
        uc: UcArgs,

        #[arg(long, default_value_t = false)]
        sim: bool,
    },

    /// Conclui a UC e imprime a etiqueta.
    ConcluirUc {
        #[command(flatten)]
        uc: UcArgs,
    },

    /// Finaliza o cabeçalho (container CONCLUIDO).
    Finalizar {
        #[command(flatten)]
        receipt: ReceiptArgs,
    },

    /// Cria as tarefas de armazenagem e confirma a posição.
    Armazenar {
        #[command(flatten)]
        uc: UcArgs,

        /// Posição confirmada; sem ela a posição é perguntada.
        #[arg(long)]
        posicao: Option<String>,
    },

    /// Registra uma ocorrência.
    Ocorrencia {
        #[command(flatten)]
        receipt: ReceiptArgs,

        #[arg(long)]
        tipo: String,

        #[arg(long)]
        descricao: String,

        #[arg(long)]
        uc: Option<String>,

        #[arg(long)]
        material: Option<String>,

        #[arg(long)]
        quantidade: Option<f64>,

        #[arg(long)]
        deposito: Option<String>,
    },

    /// Registra divergências de vários materiais, uma a uma.
    Divergencias {
        #[command(flatten)]
        receipt: ReceiptArgs,

        #[arg(long)]
        tipo: String,

        #[arg(long)]
        descricao: String,

        /// `MATERIAL` ou `MATERIAL:QUANTIDADE`, repetível.
        #[arg(long = "material", required = true)]
        materiais: Vec<String>,
    },
}

/// Interpreta `MATERIAL[:QUANTIDADE]`.
pub fn parse_divergence(raw: &str) -> Result<(String, Option<f64>), String> {
    let (material, quantity) = match raw.split_once(':') {
        Some((material, quantity)) => (material, Some(quantity)),
        None => (raw, None),
    };
    let material = material.trim();
    if material.is_empty() {
        return Err(format!("material vazio em '{raw}'"));
    }
    let quantity = match quantity {
        Some(q) => Some(
            q.trim()
                .replace(',', ".")
                .parse::<f64>()
                .map_err(|_| format!("quantidade inválida em '{raw}'"))?,
        ),
        None => None,
    };
    Ok((material.to_string(), quantity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_item_subcommand() {
        let cli = Cli::parse_from([
            "recebimento",
            "item",
            "--nf",
            "123",
            "--identificador",
            "ABC",
            "--uc",
            "U1",
            "7891234567895",
            "--validade",
            "03/2028",
        ]);
        match cli.command {
            Command::Item {
                uc,
                codigo,
                quantidade,
                validade,
                limpar_validade,
            } => {
                assert_eq!(uc.receipt.nf, "123");
                assert!(!limpar_validade);
                assert_eq!(uc.uc, "U1");
                assert_eq!(codigo, "7891234567895");
                assert!(quantidade.is_none());
                assert_eq!(validade.as_deref(), Some("03/2028"));
            }
            _ => panic!("expected Item command"),
        }
    }

    #[test]
    fn cli_parses_clear_expiration_flag() {
        let cli = Cli::parse_from([
            "recebimento",
            "item",
            "--nf",
            "123",
            "--identificador",
            "ABC",
            "--uc",
            "U1",
            "MAT-1",
            "--limpar-validade",
            "--validade",
            "05/2029",
        ]);
        match cli.command {
            Command::Item {
                limpar_validade,
                validade,
                ..
            } => {
                assert!(limpar_validade);
                assert_eq!(validade.as_deref(), Some("05/2029"));
            }
            _ => panic!("expected Item command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "recebimento",
            "--config",
            "/etc/recebimento.toml",
            "--max-retries",
            "5",
            "--verbose",
            "identificador",
            "ABC",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.max_retries, Some(5));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/recebimento.toml")));
    }

    #[test]
    fn cli_parses_repeated_materials() {
        let cli = Cli::parse_from([
            "recebimento",
            "divergencias",
            "--nf",
            "123",
            "--identificador",
            "ABC",
            "--tipo",
            "FALTA",
            "--descricao",
            "Faltaram volumes",
            "--material",
            "MAT-1:2",
            "--material",
            "MAT-2",
        ]);
        match cli.command {
            Command::Divergencias { materiais, .. } => {
                assert_eq!(materiais, vec!["MAT-1:2", "MAT-2"]);
            }
            _ => panic!("expected Divergencias command"),
        }
    }

    #[test]
    fn divergence_argument_format() {
        assert_eq!(
            parse_divergence("MAT-1:2,5").unwrap(),
            ("MAT-1".to_string(), Some(2.5))
        );
        assert_eq!(parse_divergence("MAT-2").unwrap(), ("MAT-2".to_string(), None));
        assert!(parse_divergence(":3").is_err());
        assert!(parse_divergence("MAT-1:x").is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
