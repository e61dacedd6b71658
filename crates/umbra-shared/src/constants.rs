/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 / X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// An account id is one prefix byte followed by a 32-byte public key
pub const ACCOUNT_ID_SIZE: usize = 33;

/// Maximum plaintext size for a single message (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Default time-to-live for messages stored in a swarm (14 days, ms)
pub const DEFAULT_MESSAGE_TTL_MS: u64 = 14 * 24 * 60 * 60 * 1000;

/// Maximum tolerated difference between our clock and a server's (ms).
/// Requests rejected beyond this are a terminal error, not a retry.
pub const CLOCK_SKEW_TOLERANCE_MS: u64 = 60_000;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SEALED_ENVELOPE: &str = "umbra-sealed-envelope-v1";
pub const KDF_CONTEXT_BLINDING_FACTOR: &str = "umbra-blinding-factor-v1";
pub const KDF_CONTEXT_BLINDED_NONCE: &str = "umbra-blinded-sig-nonce-v1";
pub const KDF_CONTEXT_BLINDED_CHALLENGE: &str = "umbra-blinded-sig-challenge-v1";
pub const KDF_CONTEXT_BLINDED_SHARED: &str = "umbra-blinded-shared-secret-v1";
pub const KDF_CONTEXT_CONFIG_KEY: &str = "umbra-config-key-v1";
pub const KDF_CONTEXT_DB_KEY: &str = "umbra-db-key-v1";
