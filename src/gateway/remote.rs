use std::sync::Arc;

use serde_json::Value;
use tokio::time::sleep;

use super::error::GatewayError;
use super::types::{
    CallOptions, FunctionMethod, GatewayObserver, NoopObserver, ODataRequest, ReadParams,
    Transport,
};

/// Typed wrapper around a [`Transport`] that owns retry, backoff and error
/// presentation. Every remote call in the crate goes through here.
pub struct Gateway<T> {
    transport: T,
    defaults: CallOptions,
    observer: Arc<dyn GatewayObserver>,
}

impl<T: Transport> Gateway<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            defaults: CallOptions::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_defaults(mut self, defaults: CallOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn GatewayObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Options used by the typed helpers when the caller has no preference.
    pub fn defaults(&self) -> CallOptions {
        self.defaults
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn read(
        &self,
        path: &str,
        params: ReadParams,
        opts: CallOptions,
    ) -> Result<Value, GatewayError> {
        let request = ODataRequest::Read {
            path: path.to_string(),
            params,
        };
        self.execute(request, opts).await
    }

    pub async fn create(
        &self,
        set: &str,
        data: Value,
        opts: CallOptions,
    ) -> Result<Value, GatewayError> {
        let request = ODataRequest::Create {
            set: set.to_string(),
            data,
        };
        self.execute(request, opts).await
    }

    pub async fn update(
        &self,
        path: &str,
        data: Value,
        opts: CallOptions,
    ) -> Result<(), GatewayError> {
        let request = ODataRequest::Update {
            path: path.to_string(),
            data,
        };
        self.execute(request, opts).await.map(|_| ())
    }

    pub async fn delete(&self, path: &str, opts: CallOptions) -> Result<(), GatewayError> {
        let request = ODataRequest::Delete {
            path: path.to_string(),
        };
        self.execute(request, opts).await.map(|_| ())
    }

    pub async fn call_function(
        &self,
        name: &str,
        params: &[(&str, &str)],
        method: FunctionMethod,
        opts: CallOptions,
    ) -> Result<Value, GatewayError> {
        let request = ODataRequest::Function {
            name: name.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            method,
        };
        self.execute(request, opts).await
    }

    /// Update that tolerates a missing or mismatched record.
    ///
    /// 404 and 400 are logged and reported as `Ok(false)`; any other failure
    /// is returned as usual.
    pub async fn update_tolerant(
        &self,
        path: &str,
        data: Value,
        opts: CallOptions,
    ) -> Result<bool, GatewayError> {
        match self.update(path, data, opts.silent()).await {
            Ok(()) => Ok(true),
            Err(GatewayError::Http { status, message }) if status == 404 || status == 400 => {
                tracing::warn!(path, status, %message, "tolerated update failure");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs `request` with up to `opts.max_retries` retries on retryable errors,
    /// waiting `retry_delay * attempt` between attempts.
    pub async fn execute(
        &self,
        request: ODataRequest,
        opts: CallOptions,
    ) -> Result<Value, GatewayError> {
        let label = request.route();
        if opts.show_busy {
            self.observer.busy_started(&label);
        }

        let mut attempt: u32 = 0;
        let result = loop {
            match self.transport.send(&request).await {
                Ok(value) => break Ok(value),
                Err(err) if err.is_retryable() && attempt < opts.max_retries => {
                    attempt += 1;
                    let delay = opts.delay_for_attempt(attempt);
                    tracing::warn!(
                        route = %label,
                        attempt,
                        max_retries = opts.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying remote call"
                    );
                    sleep(delay).await;
                }
                Err(err) => break Err(err),
            }
        };

        if opts.show_busy {
            self.observer.busy_finished();
        }

        if let Err(err) = &result {
            if opts.handle_error {
                self.observer.report_error(&label, err);
            }
            tracing::debug!(route = %label, attempts = attempt + 1, error = %err, "remote call failed");
        }

        result
    }
}
