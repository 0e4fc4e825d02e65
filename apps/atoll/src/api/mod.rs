use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

mod queries;
use queries::{
    APP_ENVIRONMENT, COMPLETED_COMMANDS, REQUEST_SQL_UPLOAD, START_SQL_IMPORT, TRIGGER_WP_COMMAND,
};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    base_url: Url,
    bearer_token: Option<String>,
}

impl ApiConfig {
    pub fn new(api_base: impl AsRef<str>) -> Result<Self, ApiError> {
        let mut base = api_base.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(ApiError::InvalidConfig("api base url cannot be empty".into()));
        }
        if !base.contains("://") {
            let scheme = if is_local_host(&base) { "http://" } else { "https://" };
            base = format!("{scheme}{base}");
        }
        let parsed = Url::parse(&base)
            .map_err(|err| ApiError::InvalidConfig(format!("invalid api base url: {err}")))?;
        Ok(Self {
            base_url: parsed,
            bearer_token: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }
}

fn is_local_host(base: &str) -> bool {
    let host = base.split('/').next().unwrap_or(base);
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "[::1]")
}

/// The command handle issued by the dispatcher: the id of the registered
/// invocation plus a one-time token authorizing it to run. The token is a
/// secret and must never be logged.
#[derive(Clone, Deserialize)]
pub struct CommandHandle {
    pub command_id: String,
    pub input_token: String,
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("command_id", &self.command_id)
            .field("input_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Environment {
    pub app_id: String,
    pub env_id: String,
    pub app: String,
    pub env: String,
    pub is_production: bool,
}

#[derive(Debug, Clone)]
pub struct CompletedCommand {
    pub command_id: String,
    pub command: String,
    pub started_at: OffsetDateTime,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid api configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("authorization rejected; run 'atoll auth login' to refresh your token")]
    Unauthorized,
    #[error("{}", .0.join("; "))]
    Rejected(Vec<String>),
    #[error("rate limit exceeded; wait a moment and try again")]
    RateLimited,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
trait ApiBackend: Send + Sync {
    /// One GraphQL round trip: returns the `data` value or a structured error.
    async fn call(
        &self,
        base_url: &Url,
        token: Option<&str>,
        document: &'static str,
        variables: Value,
    ) -> Result<Value, ApiError>;
}

#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ApiConfig>,
    backend: Arc<dyn ApiBackend>,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let backend = Arc::new(ReqwestApiBackend::new()?);
        Ok(Self {
            config: Arc::new(config),
            backend,
        })
    }

    #[cfg(test)]
    fn with_backend(config: ApiConfig, backend: Arc<dyn ApiBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn call(&self, document: &'static str, variables: Value) -> Result<Value, ApiError> {
        self.backend
            .call(
                self.config.base_url(),
                self.config.bearer_token(),
                document,
                variables,
            )
            .await
    }

    /// Register a `wp-cli` invocation for the given environment. The returned
    /// handle is the precondition for opening a session transport.
    pub async fn dispatch_wp_command(
        &self,
        app_id: &str,
        env_id: &str,
        command: &str,
    ) -> Result<CommandHandle, ApiError> {
        let data = self
            .call(
                TRIGGER_WP_COMMAND,
                json!({ "appId": app_id, "envId": env_id, "command": command }),
            )
            .await?;
        let handle = data
            .pointer("/triggerWpCommand")
            .cloned()
            .ok_or_else(|| ApiError::InvalidResponse("missing triggerWpCommand".into()))?;
        let raw: RawCommandHandle = serde_json::from_value(handle)
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;
        Ok(CommandHandle {
            command_id: raw.command_id,
            input_token: raw.input_token,
        })
    }

    pub async fn list_completed_commands(
        &self,
        app_id: &str,
        limit: u32,
    ) -> Result<Vec<CompletedCommand>, ApiError> {
        let data = self
            .call(
                COMPLETED_COMMANDS,
                json!({ "appId": app_id, "limit": limit }),
            )
            .await?;
        let raw = data
            .pointer("/app/commands")
            .cloned()
            .ok_or_else(|| ApiError::InvalidResponse("missing app.commands".into()))?;
        let raw: Vec<RawCompletedCommand> = serde_json::from_value(raw)
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;
        raw.into_iter()
            .map(|item| {
                let started_at = OffsetDateTime::parse(
                    &item.started_at,
                    &time::format_description::well_known::Rfc3339,
                )
                .map_err(|err| {
                    ApiError::InvalidResponse(format!("bad startedAt timestamp: {err}"))
                })?;
                Ok(CompletedCommand {
                    command_id: item.id,
                    command: item.command,
                    started_at,
                })
            })
            .collect()
    }

    pub async fn lookup_environment(
        &self,
        app: &str,
        env: &str,
    ) -> Result<Environment, ApiError> {
        let data = self
            .call(APP_ENVIRONMENT, json!({ "app": app, "env": env }))
            .await?;
        let app_id = data
            .pointer("/app/id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ApiError::InvalidResponse(format!("application '{app}' not found"))
            })?
            .to_string();
        let environment = data.pointer("/app/environment").ok_or_else(|| {
            ApiError::InvalidResponse(format!("environment '{env}' not found on '{app}'"))
        })?;
        if environment.is_null() {
            return Err(ApiError::InvalidResponse(format!(
                "environment '{env}' not found on '{app}'"
            )));
        }
        let env_id = environment
            .pointer("/id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::InvalidResponse("environment id missing".into()))?
            .to_string();
        let is_production = environment
            .pointer("/isProduction")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Environment {
            app_id,
            env_id,
            app: app.to_string(),
            env: env.to_string(),
            is_production,
        })
    }

    /// Ask the platform for a signed URL to upload a SQL dump to.
    pub async fn request_sql_upload(
        &self,
        env_id: &str,
        file_name: &str,
    ) -> Result<String, ApiError> {
        let data = self
            .call(
                REQUEST_SQL_UPLOAD,
                json!({ "envId": env_id, "fileName": file_name }),
            )
            .await?;
        data.pointer("/requestSqlUpload/uploadUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidResponse("missing upload url".into()))
    }

    pub async fn start_sql_import(&self, env_id: &str) -> Result<(), ApiError> {
        let data = self
            .call(START_SQL_IMPORT, json!({ "envId": env_id }))
            .await?;
        let success = data
            .pointer("/startSqlImport/success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if success {
            Ok(())
        } else {
            Err(ApiError::InvalidResponse(
                "import was not accepted by the platform".into(),
            ))
        }
    }
}

#[derive(Deserialize)]
struct RawCommandHandle {
    #[serde(rename = "commandId")]
    command_id: String,
    #[serde(rename = "inputToken")]
    input_token: String,
}

#[derive(Deserialize)]
struct RawCompletedCommand {
    id: String,
    command: String,
    #[serde(rename = "startedAt")]
    started_at: String,
}

struct ReqwestApiBackend {
    client: reqwest::Client,
}

impl ReqwestApiBackend {
    fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client })
    }
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[async_trait]
impl ApiBackend for ReqwestApiBackend {
    async fn call(
        &self,
        base_url: &Url,
        token: Option<&str>,
        document: &'static str,
        variables: Value,
    ) -> Result<Value, ApiError> {
        let endpoint = base_url
            .join("graphql")
            .map_err(|err| ApiError::InvalidConfig(format!("invalid graphql endpoint: {err}")))?;
        let mut builder = self.client.post(endpoint);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .json(&json!({ "query": document, "variables": variables }))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus(status));
        }
        let payload = response.json::<GraphQlResponse>().await?;
        classify_response(payload)
    }
}

fn classify_response(payload: GraphQlResponse) -> Result<Value, ApiError> {
    if !payload.errors.is_empty() {
        let messages: Vec<String> = payload.errors.into_iter().map(|e| e.message).collect();
        if messages
            .iter()
            .any(|m| m.to_ascii_lowercase().contains("rate limit"))
        {
            return Err(ApiError::RateLimited);
        }
        return Err(ApiError::Rejected(messages));
    }
    payload
        .data
        .ok_or_else(|| ApiError::InvalidResponse("response carried no data".into()))
}
