//! Endpoint invocation boundary.
//!
//! The executor never issues HTTP itself; it calls an [`EndpointInvoker`]
//! with `(endpoint_id, resolved parameters)` and records whatever comes back.
//! [`NoopInvoker`] echoes its arguments for previews and tests;
//! [`GatewayInvoker`] posts to the execution gateway's step endpoint and
//! unwraps its response envelope.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map as JsonMap, Value, json};
use tracing::debug;

use apiflow_api::GatewayClient;

use crate::error::InvokeError;

/// Path the gateway exposes for single-step execution.
const DEFAULT_EXECUTE_PATH: &str = "/api/workflows/execute-step";

/// Executes one endpoint call on behalf of the engine.
///
/// Implementations own transport, authentication, and timeouts. A single
/// attempt per call: retry policy, when wanted, wraps an invoker rather than
/// living in the executor loop.
#[async_trait]
pub trait EndpointInvoker: Send + Sync {
    /// Invokes the endpoint identified by `endpoint_id` with a fully
    /// resolved parameter map.
    async fn invoke(&self, endpoint_id: &str, parameters: &JsonMap<String, Value>) -> Result<Value, InvokeError>;
}

/// Returns a synthetic payload echoing the call, with no side effects.
pub struct NoopInvoker;

#[async_trait]
impl EndpointInvoker for NoopInvoker {
    async fn invoke(&self, endpoint_id: &str, parameters: &JsonMap<String, Value>) -> Result<Value, InvokeError> {
        Ok(json!({
            "endpointId": endpoint_id,
            "parameters": Value::Object(parameters.clone()),
        }))
    }
}

/// Invoker backed by the HTTP execution gateway.
pub struct GatewayInvoker {
    client: GatewayClient,
    execute_path: String,
}

impl GatewayInvoker {
    pub fn new(client: GatewayClient) -> Self {
        Self {
            client,
            execute_path: DEFAULT_EXECUTE_PATH.to_string(),
        }
    }

    /// Overrides the step-execution path for gateways mounted elsewhere.
    pub fn with_execute_path(mut self, path: impl Into<String>) -> Self {
        self.execute_path = path.into();
        self
    }
}

#[async_trait]
impl EndpointInvoker for GatewayInvoker {
    async fn invoke(&self, endpoint_id: &str, parameters: &JsonMap<String, Value>) -> Result<Value, InvokeError> {
        debug!(endpoint = %endpoint_id, parameter_count = parameters.len(), "invoking endpoint via gateway");

        let payload = json!({
            "endpointId": endpoint_id,
            "parameters": Value::Object(parameters.clone()),
        });
        let response = self
            .client
            .request(Method::POST, &self.execute_path)
            .json(&payload)
            .send()
            .await
            .map_err(|error| InvokeError::new(format!("network error: {error}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(InvokeError::new(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        unwrap_envelope(&text)
    }
}

/// Unwraps the gateway's `{ "success": bool, "data": ... }` envelope.
///
/// A missing envelope passes the payload through untouched — the engine only
/// depends on success/failure, not on the exact response shape.
fn unwrap_envelope(text: &str) -> Result<Value, InvokeError> {
    let payload: Value = serde_json::from_str(text).map_err(|error| InvokeError::new(format!("invalid JSON response: {error}")))?;

    let Some(object) = payload.as_object() else {
        return Ok(payload);
    };
    let Some(success) = object.get("success").and_then(Value::as_bool) else {
        return Ok(payload);
    };

    if !success {
        let message = object
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("gateway reported failure");
        return Err(InvokeError::new(message));
    }

    Ok(object.get("data").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn noop_invoker_echoes_the_call() {
        let mut parameters = JsonMap::new();
        parameters.insert("userId".into(), json!("u1"));

        let result = NoopInvoker.invoke("create-order", &parameters).await.expect("invoke");
        assert_eq!(result["endpointId"], "create-order");
        assert_eq!(result["parameters"]["userId"], "u1");
    }

    #[test]
    fn envelope_unwraps_data_on_success() {
        let unwrapped = unwrap_envelope(r#"{"success": true, "data": {"stepId": "s", "result": {"id": "u1"}}}"#).expect("unwrap");
        assert_eq!(unwrapped, json!({"stepId": "s", "result": {"id": "u1"}}));
    }

    #[test]
    fn envelope_failure_carries_the_gateway_message() {
        let error = unwrap_envelope(r#"{"success": false, "error": "endpoint not found"}"#).expect_err("must fail");
        assert_eq!(error.message, "endpoint not found");

        let error = unwrap_envelope(r#"{"success": false}"#).expect_err("must fail");
        assert_eq!(error.message, "gateway reported failure");
    }

    #[test]
    fn non_envelope_payloads_pass_through() {
        assert_eq!(unwrap_envelope(r#"{"id": "u1"}"#).expect("unwrap"), json!({"id": "u1"}));
        assert_eq!(unwrap_envelope("[1, 2]").expect("unwrap"), json!([1, 2]));
    }

    #[test]
    fn invalid_json_is_an_invoke_error() {
        let error = unwrap_envelope("not json").expect_err("must fail");
        assert!(error.message.contains("invalid JSON"));
    }
}
