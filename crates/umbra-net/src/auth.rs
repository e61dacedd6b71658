//! Request authentication.
//!
//! Swarm nodes authenticate the account owner with a standard Ed25519
//! signature; community servers authenticate a per-server blinded keypair so
//! posts are not linkable to the real account. Either way the signature
//! covers `method || path || timestamp || blake3(body)`, carried in
//! `X-Umbra-*` headers.

use ed25519_dalek::Signature;

use umbra_shared::blinding::{verify_blinded, BlindedKeyPair};
use umbra_shared::envelope::sender_account_id;
use umbra_shared::identity::verify_signature;
use umbra_shared::{AccountId, Identity};

use crate::backend::{HttpRequest, Method};

pub const HEADER_PUBKEY: &str = "X-Umbra-Pubkey";
pub const HEADER_ED25519: &str = "X-Umbra-Ed25519";
pub const HEADER_TIMESTAMP: &str = "X-Umbra-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Umbra-Signature";

/// The signing key a request is authenticated with.
#[derive(Clone, Copy)]
pub enum RequestAuth<'a> {
    /// The long-term identity key; used against the account's own swarm.
    Standard(&'a Identity),
    /// A per-server blinded keypair; used against community servers.
    Blinded(&'a BlindedKeyPair),
}

impl RequestAuth<'_> {
    /// The account id this auth presents itself as.
    pub fn account_id(&self) -> AccountId {
        match self {
            RequestAuth::Standard(identity) => identity.account_id(),
            RequestAuth::Blinded(keys) => keys.account_id(),
        }
    }

    /// Sign the request and attach the authentication headers.
    ///
    /// `path` must be the path the server will see (everything after the
    /// host), since it is part of the signed bytes.
    pub fn apply(&self, request: HttpRequest, path: &str, timestamp_ms: u64) -> HttpRequest {
        let digest = canonical_bytes(request.method, path, timestamp_ms, &request.body);
        let (pubkey, ed25519, signature) = match self {
            RequestAuth::Standard(identity) => (
                identity.account_id().to_hex(),
                Some(hex::encode(identity.ed25519_public_key())),
                identity.sign(&digest).to_bytes(),
            ),
            RequestAuth::Blinded(keys) => {
                (keys.account_id().to_hex(), None, keys.sign(&digest))
            }
        };

        let mut request = request
            .header(HEADER_PUBKEY, pubkey)
            .header(HEADER_TIMESTAMP, timestamp_ms.to_string())
            .header(HEADER_SIGNATURE, base64_encode(&signature));
        if let Some(ed25519) = ed25519 {
            request = request.header(HEADER_ED25519, ed25519);
        }
        request
    }
}

/// The exact bytes a request signature covers.
pub fn canonical_bytes(method: Method, path: &str, timestamp_ms: u64, body: &[u8]) -> Vec<u8> {
    let body_hash = blake3::hash(body);
    let mut out = Vec::with_capacity(method.as_str().len() + path.len() + 20 + 32);
    out.extend_from_slice(method.as_str().as_bytes());
    out.extend_from_slice(path.as_bytes());
    out.extend_from_slice(timestamp_ms.to_string().as_bytes());
    out.extend_from_slice(body_hash.as_bytes());
    out
}

/// Check a request's authentication headers the way a server would.
///
/// For a standard id the Ed25519 header must verify the signature *and*
/// convert to the X25519 key inside the presented account id; for a blinded
/// id the signature must verify against the blinded point itself.
pub fn verify_request(request: &HttpRequest, path: &str) -> bool {
    let Some(pubkey_hex) = request.header_value(HEADER_PUBKEY) else {
        return false;
    };
    let Some(timestamp) = request
        .header_value(HEADER_TIMESTAMP)
        .and_then(|v| v.parse::<u64>().ok())
    else {
        return false;
    };
    let Some(signature) = request
        .header_value(HEADER_SIGNATURE)
        .and_then(|v| base64_decode(v))
        .and_then(|bytes| <[u8; 64]>::try_from(bytes.as_slice()).ok())
    else {
        return false;
    };
    let Ok(account_id) = AccountId::from_hex(pubkey_hex) else {
        return false;
    };

    let digest = canonical_bytes(request.method, path, timestamp, &request.body);

    if account_id.is_standard() {
        let Some(ed25519) = request
            .header_value(HEADER_ED25519)
            .and_then(|v| hex::decode(v).ok())
            .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
        else {
            return false;
        };
        // The signing key must be the one behind the presented account id.
        if sender_account_id(&ed25519).ok() != Some(account_id) {
            return false;
        }
        verify_signature(&ed25519, &digest, &Signature::from_bytes(&signature)).is_ok()
    } else {
        verify_blinded(&account_id.key, &digest, &signature).is_ok()
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_auth_round_trip() {
        let identity = Identity::generate();
        let request = HttpRequest::get("http://snode/v1/retrieve");
        let request = RequestAuth::Standard(&identity).apply(request, "/v1/retrieve", 1_700_000);

        assert_eq!(
            request.header_value(HEADER_PUBKEY),
            Some(identity.account_id().to_hex().as_str())
        );
        assert!(verify_request(&request, "/v1/retrieve"));
        assert!(!verify_request(&request, "/v1/store"));
    }

    #[test]
    fn blinded_auth_round_trip() {
        let identity = Identity::generate();
        let server_pk = [9u8; 32];
        let keys = BlindedKeyPair::derive(&identity, &server_pk);

        let request = HttpRequest::get("http://community/inbox");
        let request = RequestAuth::Blinded(&keys).apply(request, "/inbox", 42);

        assert!(verify_request(&request, "/inbox"));
        assert!(!keys.account_id().is_standard());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let identity = Identity::generate();
        let request = HttpRequest::post_json("http://snode/v1/store", &serde_json::json!({"a": 1}))
            .unwrap();
        let mut request = RequestAuth::Standard(&identity).apply(request, "/v1/store", 7);

        assert!(verify_request(&request, "/v1/store"));
        request.body = b"{\"a\":2}".to_vec();
        assert!(!verify_request(&request, "/v1/store"));
    }

    #[test]
    fn mismatched_ed25519_key_is_rejected() {
        let identity = Identity::generate();
        let other = Identity::generate();
        let request = HttpRequest::get("http://snode/v1/retrieve");
        let mut request = RequestAuth::Standard(&identity).apply(request, "/v1/retrieve", 1);

        // Swap in a different Ed25519 key; the account id no longer matches.
        for header in request.headers.iter_mut() {
            if header.0 == HEADER_ED25519 {
                header.1 = hex::encode(other.ed25519_public_key());
            }
        }
        assert!(!verify_request(&request, "/v1/retrieve"));
    }
}
