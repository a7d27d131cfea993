use {async_trait::async_trait, serde_json::Value};

use crate::Result;

/// Outbound API handle reachable from every handler context.
///
/// One send-style call per remote capability: `method` names the remote
/// endpoint (e.g. `sendMessage`) and `params` is its JSON argument object.
/// The decoded `result` field of the response is returned.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
}

/// Client that accepts every call and returns `true`, for routers that never
/// talk back and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClient;

#[async_trait]
impl ApiClient for NoopClient {
    async fn call(&self, _method: &str, _params: Value) -> Result<Value> {
        Ok(Value::Bool(true))
    }
}
