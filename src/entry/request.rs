//! Request and response envelopes.
//!
//! Every client request, regardless of wire protocol, is normalized into a
//! [`RequestEnvelope`] and answered with a [`ResponseEnvelope`]. The core
//! behind [`RequestFunnel`] must always produce a response envelope, for
//! failures included; clients never see internal error types.

use super::registry::Connection;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Normalized inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Controller the request targets.
    pub controller: String,

    /// Action within the controller.
    pub action: String,

    /// Client-chosen correlation id, echoed back verbatim.
    #[serde(rename = "requestId")]
    pub request_id: String,

    /// Remaining request parameters.
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl RequestEnvelope {
    /// Create a request with no extra parameters.
    pub fn new(
        controller: impl Into<String>,
        action: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
            request_id: request_id.into(),
            params: serde_json::Map::new(),
        }
    }

    /// Attach a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Serializable response returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// HTTP-style status code.
    pub status: u16,

    /// Correlation id from the request.
    #[serde(rename = "requestId")]
    pub request_id: String,

    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,

    /// Channel tag for realtime notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl ResponseEnvelope {
    /// Successful response.
    pub fn ok(request_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            status: 200,
            request_id: request_id.into(),
            result: Some(result),
            error: None,
            room: None,
        }
    }

    /// Error response.
    pub fn error(status: u16, request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            request_id: request_id.into(),
            result: None,
            error: Some(serde_json::json!({ "message": message.into() })),
            room: None,
        }
    }

    /// Error returned while the node refuses new work during shutdown.
    pub fn shutting_down(request_id: impl Into<String>) -> Self {
        Self::error(503, request_id, "service is shutting down")
    }
}

/// Boxed future returned by the request funnel.
pub type FunnelFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The core request pipeline behind the entry point.
///
/// Implementations own routing, authentication, and controller dispatch;
/// whatever happens inside, the returned envelope is what the client sees.
pub trait RequestFunnel: Send + Sync {
    /// Process one request on behalf of a connection.
    fn execute(&self, connection: Connection, request: RequestEnvelope)
        -> FunnelFuture<ResponseEnvelope>;
}

/// Funnel double echoing the request back, for tests.
#[derive(Debug, Default, Clone)]
pub struct EchoFunnel;

impl RequestFunnel for EchoFunnel {
    fn execute(
        &self,
        _connection: Connection,
        request: RequestEnvelope,
    ) -> FunnelFuture<ResponseEnvelope> {
        Box::pin(async move {
            ResponseEnvelope::ok(
                request.request_id.clone(),
                serde_json::json!({
                    "controller": request.controller,
                    "action": request.action,
                }),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let wire = r#"{
            "controller": "realtime",
            "action": "subscribe",
            "requestId": "req-1",
            "index": "i",
            "collection": "c",
            "body": {"term": {}}
        }"#;
        let request: RequestEnvelope = serde_json::from_str(wire).unwrap();
        assert_eq!(request.controller, "realtime");
        assert_eq!(request.request_id, "req-1");
        assert_eq!(request.params["index"], "i");
        assert_eq!(request.params["body"]["term"], json!({}));
    }

    #[test]
    fn test_response_omits_empty_fields() {
        let ok = ResponseEnvelope::ok("req-1", json!({"roomId": "r1"}));
        let wire = serde_json::to_string(&ok).unwrap();
        assert!(wire.contains("\"requestId\":\"req-1\""));
        assert!(!wire.contains("error"));
        assert!(!wire.contains("room"));

        let err = ResponseEnvelope::shutting_down("req-2");
        assert_eq!(err.status, 503);
        assert_eq!(err.error.unwrap()["message"], "service is shutting down");
    }

    #[tokio::test]
    async fn test_echo_funnel_always_responds() {
        let funnel = EchoFunnel;
        let connection = Connection::new(crate::protocols::ConnectionId(1), "websocket", vec![]);
        let response = funnel
            .execute(connection, RequestEnvelope::new("auth", "login", "req-9"))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.result.unwrap()["action"], "login");
    }
}
