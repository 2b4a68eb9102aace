use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::error::{GatewayError, extract_message};
use super::types::{FunctionMethod, ODataRequest, Transport, escape_literal};
use crate::config::RecebConfig;

const CSRF_HEADER: &str = "x-csrf-token";

/// HTTP transport for an OData v2 service (SAP Gateway flavoured).
///
/// Handles basic auth, the `d` response envelope, SAP error bodies and the
/// CSRF token handshake required for modifying requests. One call to
/// [`Transport::send`] is exactly one attempt (plus at most one token refresh).
pub struct HttpTransport {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
    csrf_token: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, Duration::from_secs(60))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
            csrf_token: Mutex::new(None),
        })
    }

    pub fn from_config(config: &RecebConfig) -> Result<Self, GatewayError> {
        let transport = Self::with_timeout(
            config.service_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        if config.username.is_empty() {
            Ok(transport)
        } else {
            Ok(transport.with_credentials(config.username.clone(), config.password.clone()))
        }
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    fn cached_token(&self) -> Option<String> {
        self.csrf_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store_token(&self, token: Option<String>) {
        *self
            .csrf_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    async fn fetch_csrf_token(&self) -> Result<Option<String>, GatewayError> {
        let response = self
            .authorize(self.client.get(self.url("")))
            .header(CSRF_HEADER, "Fetch")
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        tracing::debug!(found = token.is_some(), "CSRF token fetched");
        self.store_token(token.clone());
        Ok(token)
    }

    async fn csrf_token(&self) -> Result<Option<String>, GatewayError> {
        match self.cached_token() {
            Some(token) => Ok(Some(token)),
            None => self.fetch_csrf_token().await,
        }
    }

    fn build(&self, request: &ODataRequest, token: Option<&str>) -> RequestBuilder {
        let format = ("$format".to_string(), "json".to_string());
        let builder = match request {
            ODataRequest::Read { path, params } => {
                let mut query = vec![format];
                if let Some(filter) = params.filter_expression() {
                    query.push(("$filter".to_string(), filter));
                }
                self.client.get(self.url(path)).query(&query)
            }
            ODataRequest::Create { set, data } => self.client.post(self.url(set)).json(data),
            ODataRequest::Update { path, data } => self.client.patch(self.url(path)).json(data),
            ODataRequest::Delete { path } => self.client.delete(self.url(path)),
            ODataRequest::Function {
                name,
                params,
                method,
            } => {
                // Parâmetros de function import viajam como literais OData na query string.
                let mut query: Vec<(String, String)> = params
                    .iter()
                    .map(|(k, v)| (k.clone(), format!("'{}'", escape_literal(v))))
                    .collect();
                query.push(format);
                let url = self.url(name);
                match method {
                    FunctionMethod::Get => self.client.get(url).query(&query),
                    FunctionMethod::Post => self.client.post(url).query(&query),
                }
            }
        };

        let builder = self.authorize(builder).header(ACCEPT, "application/json");
        match token {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        }
    }

    async fn dispatch(&self, request: &ODataRequest) -> Result<Value, GatewayError> {
        if !request.is_modifying() {
            let response = self.build(request, None).send().await?;
            return read_body(response).await;
        }

        let token = self.csrf_token().await?;
        let response = self.build(request, token.as_deref()).send().await?;

        if response.status() == StatusCode::FORBIDDEN && csrf_required(&response) {
            tracing::debug!(route = %request, "CSRF token rejected, refreshing");
            self.store_token(None);
            let token = self.fetch_csrf_token().await?;
            let response = self.build(request, token.as_deref()).send().await?;
            return read_body(response).await;
        }

        read_body(response).await
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: &ODataRequest,
    ) -> impl std::future::Future<Output = Result<Value, GatewayError>> + Send {
        self.dispatch(request)
    }
}

fn csrf_required(response: &Response) -> bool {
    response
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("required"))
}

async fn read_body(response: Response) -> Result<Value, GatewayError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Http {
            status: status.as_u16(),
            message: extract_message(&body),
        });
    }

    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }

    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(&text)?;
    Ok(unwrap_envelope(value))
}

/// Remove o envelope `{"d": ...}` das respostas OData v2.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("d") => {
            map.remove("d").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::functions::header_path;
    use crate::gateway::types::ReadParams;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn unwrap_envelope_strips_d() {
        let value = json!({"d": {"Nf": "123"}});
        assert_eq!(unwrap_envelope(value), json!({"Nf": "123"}));
        assert_eq!(unwrap_envelope(json!({"Nf": "1"})), json!({"Nf": "1"}));
    }

    #[tokio::test]
    async fn read_unwraps_envelope_and_sends_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/StatusUCSet"))
            .and(query_param("$filter", "Uc eq 'U1'"))
            .and(query_param("$format", "json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"d": {"results": [{"Uc": "U1"}]}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let request = ODataRequest::Read {
            path: "StatusUCSet".into(),
            params: ReadParams::new().filter("Uc", "U1"),
        };
        let value = transport.send(&request).await.unwrap();
        assert_eq!(value, json!({"results": [{"Uc": "U1"}]}));
    }

    #[tokio::test]
    async fn function_params_are_quoted_literals() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ValidIdentificador"))
            .and(query_param("Identificador", "'ABC'"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"d": {"ValidIdentificador": {"Nf": "123"}}})),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let request = ODataRequest::Function {
            name: "ValidIdentificador".into(),
            params: vec![("Identificador".into(), "ABC".into())],
            method: FunctionMethod::Get,
        };
        let value = transport.send(&request).await.unwrap();
        assert_eq!(value, json!({"ValidIdentificador": {"Nf": "123"}}));
    }

    #[tokio::test]
    async fn error_body_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/HeaderSet(Nf='1',Identificador='X')"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "/IWBEP/CM_MGW_RT/020", "message": {"lang": "pt", "value": "Recurso não encontrado"}}
            })))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let request = ODataRequest::Read {
            path: "HeaderSet(Nf='1',Identificador='X')".into(),
            params: ReadParams::new(),
        };
        let err = transport.send(&request).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Http {
                status: 404,
                message: "Recurso não encontrado".into()
            }
        );
    }

    #[tokio::test]
    async fn modifying_request_carries_csrf_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("x-csrf-token", "Fetch"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "tok-1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ItemsSet"))
            .and(header("x-csrf-token", "tok-1"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"d": {"ItemUc": "000010"}})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let request = ODataRequest::Create {
            set: "ItemsSet".into(),
            data: json!({"Material": "MAT-1"}),
        };
        let value = transport.send(&request).await.unwrap();
        assert_eq!(value, json!({"ItemUc": "000010"}));
        // Second call reuses the cached token.
        transport.send(&request).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_and_request_resent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("x-csrf-token", "Fetch"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "tok-new"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ItemsSet"))
            .and(header("x-csrf-token", "tok-stale"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-csrf-token", "Required"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ItemsSet"))
            .and(header("x-csrf-token", "tok-new"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"d": {"ItemUc": "000020"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        transport.store_token(Some("tok-stale".into()));
        let request = ODataRequest::Create {
            set: "ItemsSet".into(),
            data: json!({"Material": "MAT-1"}),
        };
        let value = transport.send(&request).await.unwrap();
        assert_eq!(value, json!({"ItemUc": "000020"}));
        assert_eq!(transport.cached_token().as_deref(), Some("tok-new"));
    }

    #[tokio::test]
    async fn plain_forbidden_is_not_a_token_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("x-csrf-token", "Fetch"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "tok-new"))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ItemsSet"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Sem autorização"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        transport.store_token(Some("tok-1".into()));
        let request = ODataRequest::Create {
            set: "ItemsSet".into(),
            data: json!({}),
        };
        let err = transport.send(&request).await.unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn key_literals_stay_inside_the_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/HeaderSet(Nf='123',Identificador='CONT%237%2FB')"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"d": {"Nf": "123", "Identificador": "CONT#7/B"}}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let request = ODataRequest::Read {
            path: header_path("123", "CONT#7/B"),
            params: ReadParams::new(),
        };
        let value = transport.send(&request).await.unwrap();
        assert_eq!(value["Identificador"], "CONT#7/B");
    }

    #[tokio::test]
    async fn no_content_yields_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "t"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/ItemsSet(ItemUc='10')"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let request = ODataRequest::Delete {
            path: "ItemsSet(ItemUc='10')".into(),
        };
        assert_eq!(transport.send(&request).await.unwrap(), Value::Null);
    }
}
