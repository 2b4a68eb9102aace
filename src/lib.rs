//! Recebimento físico de mercadorias na doca.
//!
//! Um [`ReceivingWorkflow`] percorre cabeçalho, UCs, itens e armazenagem,
//! conduzido pelo [`ReceivingOrchestrator`] sobre um [`Gateway`] OData com
//! retentativas.

pub mod assembly;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod occurrence;
pub mod orchestrator;
pub mod state_machine;
pub mod ui;
pub mod validation;

pub use assembly::{Confirmation, ItemAssembly, ItemInput};
pub use config::RecebConfig;
pub use context::ReceiptContext;
pub use error::{ErrorKind, RecebError};
pub use gateway::{CallOptions, Gateway, GatewayError, HttpTransport, Transport};
pub use orchestrator::ReceivingOrchestrator;
pub use state_machine::{ReceivingState, ReceivingWorkflow};
