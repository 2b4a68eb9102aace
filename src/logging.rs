//! Inicialização do `tracing`.
//!
//! `RUST_LOG` tem precedência; sem ela o nível é `info`, ou `debug` para
//! este crate com `--verbose`. Os logs vão para stderr para não misturar
//! com a saída do terminal.

use tracing_subscriber::{EnvFilter, fmt};

pub fn default_directives(verbose: bool) -> &'static str {
    if verbose { "info,recebimento=debug" } else { "info" }
}

pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    // Uma segunda inicialização (testes, binários embutidos) é ignorada.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_enables_crate_debug() {
        assert_eq!(default_directives(false), "info");
        assert!(default_directives(true).contains("recebimento=debug"));
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(false);
        init(true);
    }
}
