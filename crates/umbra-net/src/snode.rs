//! Swarm storage-node client.
//!
//! A swarm stores sealed messages per `(account, namespace)`. The client
//! supports single `retrieve`/`store` calls and a combined `batch` request
//! so one poll cycle fetches every namespace in a single round trip.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use umbra_shared::constants::MAX_MESSAGE_SIZE;
use umbra_shared::{AccountId, ConfigNamespace};

use crate::auth::RequestAuth;
use crate::backend::{Backend, HttpRequest, HttpResponse};
use crate::error::{NetError, Result};

const RETRIEVE_PATH: &str = "/v1/retrieve";
const STORE_PATH: &str = "/v1/store";
const BATCH_PATH: &str = "/v1/batch";
const FILE_PATH: &str = "/v1/file";

/// Maximum messages returned per namespace per retrieve.
const RETRIEVE_MAX_COUNT: u32 = 256;

/// One sealed message as stored in a swarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    /// Server-assigned content hash; doubles as the retrieval cursor.
    pub hash: String,
    pub timestamp_ms: u64,
    /// Base64 payload.
    pub data: String,
}

impl StoredMessage {
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        Ok(STANDARD.decode(&self.data)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RetrieveParams {
    pubkey: String,
    namespace: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_hash: Option<String>,
    max_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct RetrieveResponse {
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreParams {
    pubkey: String,
    namespace: i32,
    /// Base64 payload.
    data: String,
    ttl_ms: u64,
    timestamp_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreResponse {
    hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileParams {
    /// Base64 payload.
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileResponse {
    url: String,
}

/// One sub-call inside a batch request.
#[derive(Debug, Serialize)]
struct BatchCall {
    endpoint: &'static str,
    params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    calls: Vec<BatchCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchReply {
    code: u16,
    body: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchResponse {
    replies: Vec<BatchReply>,
}

/// Client for one account's swarm.
#[derive(Clone)]
pub struct SnodeClient {
    backend: Arc<dyn Backend>,
    base_url: String,
}

impl SnodeClient {
    pub fn new(backend: Arc<dyn Backend>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { backend, base_url }
    }

    /// Fetch messages stored for `target` in one namespace, newer than
    /// `last_hash` (all of them when `None`).
    pub async fn retrieve(
        &self,
        auth: Option<RequestAuth<'_>>,
        target: &AccountId,
        namespace: ConfigNamespace,
        last_hash: Option<&str>,
        now_ms: u64,
    ) -> Result<Vec<StoredMessage>> {
        let params = RetrieveParams {
            pubkey: target.to_hex(),
            namespace: namespace.value(),
            last_hash: last_hash.map(String::from),
            max_count: RETRIEVE_MAX_COUNT,
        };
        let response = self.post(RETRIEVE_PATH, &params, auth, now_ms).await?;
        let parsed: RetrieveResponse = response.json()?;

        debug!(
            target_id = %target.short(),
            namespace = namespace.value(),
            count = parsed.messages.len(),
            "Retrieved swarm messages"
        );
        Ok(parsed.messages)
    }

    /// Store a sealed payload in `target`'s swarm. Returns the
    /// server-assigned hash.
    pub async fn store(
        &self,
        auth: Option<RequestAuth<'_>>,
        target: &AccountId,
        namespace: ConfigNamespace,
        data: &[u8],
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<String> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let params = StoreParams {
            pubkey: target.to_hex(),
            namespace: namespace.value(),
            data: base64_encode(data),
            ttl_ms,
            timestamp_ms: now_ms,
        };
        let response = self.post(STORE_PATH, &params, auth, now_ms).await?;
        let parsed: StoreResponse = response.json()?;

        debug!(
            target_id = %target.short(),
            namespace = namespace.value(),
            hash = %parsed.hash,
            "Stored swarm message"
        );
        Ok(parsed.hash)
    }

    /// Retrieve several namespaces in one round trip.
    ///
    /// Returns one entry per requested namespace, in request order. Any
    /// failed sub-reply fails the whole call, so a poll cycle is counted as
    /// one success or one failure.
    pub async fn retrieve_batch(
        &self,
        auth: Option<RequestAuth<'_>>,
        target: &AccountId,
        namespaces: &[(ConfigNamespace, Option<String>)],
        now_ms: u64,
    ) -> Result<Vec<(ConfigNamespace, Vec<StoredMessage>)>> {
        let calls = namespaces
            .iter()
            .map(|(namespace, last_hash)| {
                let params = RetrieveParams {
                    pubkey: target.to_hex(),
                    namespace: namespace.value(),
                    last_hash: last_hash.clone(),
                    max_count: RETRIEVE_MAX_COUNT,
                };
                Ok(BatchCall {
                    endpoint: "retrieve",
                    params: serde_json::to_value(params)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let request = BatchRequest { calls };
        let response = self.post(BATCH_PATH, &request, auth, now_ms).await?;
        let parsed: BatchResponse = response.json()?;

        if parsed.replies.len() != namespaces.len() {
            return Err(NetError::InvalidResponse(format!(
                "batch returned {} replies for {} calls",
                parsed.replies.len(),
                namespaces.len()
            )));
        }

        let mut out = Vec::with_capacity(namespaces.len());
        for ((namespace, _), reply) in namespaces.iter().zip(parsed.replies) {
            if !(200..300).contains(&reply.code) {
                return Err(NetError::Status {
                    status: reply.code,
                    body: reply.body.to_string(),
                });
            }
            let retrieved: RetrieveResponse = serde_json::from_value(reply.body)?;
            out.push((*namespace, retrieved.messages));
        }
        Ok(out)
    }

    /// Upload an opaque blob to the node's file store. Returns the URL it is
    /// served from. Callers encrypt before uploading; the node only ever sees
    /// ciphertext.
    pub async fn upload_file(
        &self,
        auth: Option<RequestAuth<'_>>,
        data: &[u8],
        now_ms: u64,
    ) -> Result<String> {
        let params = FileParams {
            data: base64_encode(data),
        };
        let response = self.post(FILE_PATH, &params, auth, now_ms).await?;
        let parsed: FileResponse = response.json()?;

        debug!(size = data.len(), url = %parsed.url, "Uploaded file");
        Ok(parsed.url)
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        auth: Option<RequestAuth<'_>>,
        now_ms: u64,
    ) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = HttpRequest::post_json(url, body)?;
        if let Some(auth) = auth {
            request = auth.apply(request, path, now_ms);
        }

        let response = self.backend.execute(request).await?;
        check_status(response)
    }
}

/// Map non-success statuses onto typed errors.
fn check_status(response: HttpResponse) -> Result<HttpResponse> {
    match response.status {
        status if (200..300).contains(&status) => Ok(response),
        // The node rejected our timestamp.
        406 => Err(NetError::ClockOutOfSync),
        status => Err(NetError::Status {
            status,
            body: response.body_text(),
        }),
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}
