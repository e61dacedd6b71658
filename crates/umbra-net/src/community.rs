//! Community server client.
//!
//! A community is a server-hosted set of rooms plus a per-user inbox for
//! pseudonymous direct messages. All authenticated calls sign with the
//! per-server blinded keypair; a server that rejects unblinded ids answers
//! 400 with a "blinded" hint, surfaced as [`NetError::BlindingRequired`] so
//! the poller can refresh capabilities and retry once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use umbra_shared::blinding::BlindedKeyPair;
use umbra_shared::constants::MAX_MESSAGE_SIZE;
use umbra_shared::AccountId;

use crate::auth::RequestAuth;
use crate::backend::{Backend, HttpRequest, HttpResponse};
use crate::error::{NetError, Result};

/// Capability advertised by servers that understand blinded ids.
pub const CAPABILITY_BLIND: &str = "blind";

#[derive(Debug, Serialize, Deserialize)]
struct CapabilitiesResponse {
    capabilities: Vec<String>,
}

/// A message posted to a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMessage {
    /// Server-assigned, monotonically increasing per room.
    pub id: i64,
    /// Blinded id of the poster.
    pub poster: String,
    /// Base64 payload.
    pub data: String,
    /// Base64 blinded signature over the raw payload bytes.
    pub signature: String,
    pub posted_at_ms: u64,
}

impl RoomMessage {
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        base64_decode(&self.data)
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        base64_decode(&self.signature)
    }
}

/// A sealed direct message delivered through the server inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboxMessage {
    /// Server-assigned, monotonically increasing per recipient.
    pub id: i64,
    /// Blinded id of the sender.
    pub sender: String,
    /// Base64 sealed payload.
    pub data: String,
    pub posted_at_ms: u64,
}

impl InboxMessage {
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        base64_decode(&self.data)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SendRoomRequest {
    /// Base64 payload.
    data: String,
    /// Base64 blinded signature over the raw payload bytes.
    signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SendInboxRequest {
    /// Base64 sealed payload.
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SendResponse {
    id: i64,
}

/// Client for one community server.
#[derive(Clone)]
pub struct CommunityClient {
    backend: Arc<dyn Backend>,
    base_url: String,
    server_pubkey: [u8; 32],
}

impl CommunityClient {
    pub fn new(
        backend: Arc<dyn Backend>,
        base_url: impl Into<String>,
        server_pubkey: [u8; 32],
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            backend,
            base_url,
            server_pubkey,
        }
    }

    /// The Ed25519 key this server publishes; blinded ids are derived
    /// against it.
    pub fn server_pubkey(&self) -> &[u8; 32] {
        &self.server_pubkey
    }

    /// Fetch the server's capability list. Unauthenticated.
    pub async fn capabilities(&self) -> Result<Vec<String>> {
        let response = self.get("/capabilities", None, 0).await?;
        let parsed: CapabilitiesResponse = response.json()?;
        debug!(capabilities = ?parsed.capabilities, "Fetched community capabilities");
        Ok(parsed.capabilities)
    }

    /// Messages posted to a room after `since_id` (recent window when
    /// `None`).
    pub async fn room_messages(
        &self,
        keys: &BlindedKeyPair,
        room: &str,
        since_id: Option<i64>,
        now_ms: u64,
    ) -> Result<Vec<RoomMessage>> {
        let path = match since_id {
            Some(id) => format!("/room/{room}/messages/since/{id}"),
            None => format!("/room/{room}/messages/recent"),
        };
        let response = self
            .get(&path, Some(RequestAuth::Blinded(keys)), now_ms)
            .await?;
        response.json()
    }

    /// Sealed direct messages addressed to our blinded id after `since_id`.
    pub async fn inbox(
        &self,
        keys: &BlindedKeyPair,
        since_id: Option<i64>,
        now_ms: u64,
    ) -> Result<Vec<InboxMessage>> {
        let path = match since_id {
            Some(id) => format!("/inbox/since/{id}"),
            None => "/inbox".to_string(),
        };
        let response = self
            .get(&path, Some(RequestAuth::Blinded(keys)), now_ms)
            .await?;
        response.json()
    }

    /// Post a signed plaintext payload to a room. Returns the message id.
    pub async fn send_room(
        &self,
        keys: &BlindedKeyPair,
        room: &str,
        data: &[u8],
        now_ms: u64,
    ) -> Result<i64> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let body = SendRoomRequest {
            data: base64_encode(data),
            signature: base64_encode(&keys.sign(data)),
        };
        let path = format!("/room/{room}/message");
        let response = self
            .post(&path, &body, Some(RequestAuth::Blinded(keys)), now_ms)
            .await?;
        let parsed: SendResponse = response.json()?;
        Ok(parsed.id)
    }

    /// Deliver a sealed payload to another blinded id's inbox.
    pub async fn send_inbox(
        &self,
        keys: &BlindedKeyPair,
        recipient: &AccountId,
        data: &[u8],
        now_ms: u64,
    ) -> Result<i64> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let body = SendInboxRequest {
            data: base64_encode(data),
        };
        let path = format!("/inbox/{}", recipient.to_hex());
        let response = self
            .post(&path, &body, Some(RequestAuth::Blinded(keys)), now_ms)
            .await?;
        let parsed: SendResponse = response.json()?;
        Ok(parsed.id)
    }

    async fn get(
        &self,
        path: &str,
        auth: Option<RequestAuth<'_>>,
        now_ms: u64,
    ) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = HttpRequest::get(url);
        if let Some(auth) = auth {
            request = auth.apply(request, path, now_ms);
        }
        let response = self.backend.execute(request).await?;
        check_status(response)
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

/// Map non-success statuses onto typed errors, sniffing the blinding hint.
fn check_status(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    let body = response.body_text();
    if response.status == 400 && body.contains("blinded") {
        return Err(NetError::BlindingRequired);
    }
    Err(NetError::Status {
        status: response.status,
        body,
    })
}

fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

fn base64_decode(s: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    Ok(STANDARD.decode(s)?)
}
