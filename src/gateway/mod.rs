pub mod client;
pub mod error;
pub mod functions;
pub mod remote;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::HttpTransport;
pub use error::GatewayError;
pub use functions::{LookupMode, OperationInfo, POSITION_EXCEPTION_CODE, TdTask};
pub use remote::Gateway;
pub use types::{
    CallOptions, FunctionMethod, GatewayObserver, NoopObserver, ODataRequest, ReadParams,
    Transport,
};
