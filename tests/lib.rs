// Shared fixtures for the behavior tests: a scripted platform, in-memory S3
// and presigned upload details.

use std::sync::Arc;

use base64::engine::general_purpose;
use base64::Engine;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use serde_json::{json, Value};

pub use irp_core::{
    ClientConfig, IrpClient, Result, RetryConfig, S3Credentials, S3Manager, ScriptedHttpClient,
    StoreProvider,
};

pub const BASE_URL: &str = "https://api.test";

/// Client over `http` with retries as given.
pub fn scripted_irp_with_retry(http: Arc<ScriptedHttpClient>, retry: RetryConfig) -> IrpClient {
    let config = ClientConfig::default()
        .with_base_url(BASE_URL)
        .with_retry(retry);
    IrpClient::with_http_client(config, http)
}

/// Client over `http` that never retries.
pub fn scripted_irp(http: Arc<ScriptedHttpClient>) -> IrpClient {
    scripted_irp_with_retry(http, RetryConfig::no_retry())
}

/// Every bucket resolves to one shared in-memory store.
pub struct InMemoryProvider(pub Arc<InMemory>);

impl StoreProvider for InMemoryProvider {
    fn store(&self, _bucket: &str, credentials: &S3Credentials) -> Result<Arc<dyn ObjectStore>> {
        credentials.validate()?;
        Ok(self.0.clone())
    }
}

/// Route the client's uploads into a fresh in-memory store.
pub fn with_memory_s3(irp: IrpClient, http: Arc<ScriptedHttpClient>) -> (IrpClient, Arc<InMemory>) {
    let memory = Arc::new(InMemory::new());
    let s3 = S3Manager::new(Arc::new(InMemoryProvider(memory.clone())), http);
    (irp.with_s3(s3), memory)
}

/// `uploadUrl` plus base64 `presignParams`, as returned for an import folder.
pub fn upload_details(url: &str) -> Value {
    let b64 = |value: &str| general_purpose::STANDARD.encode(value);
    json!({
        "uploadUrl": url,
        "presignParams": {
            "accessKeyId": b64("AKIA"),
            "secretAccessKey": b64("secret"),
            "sessionToken": b64("token"),
            "path": b64("imports"),
            "region": b64("eu-west-1"),
        }
    })
}
