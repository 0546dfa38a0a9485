/// Parley message codec.
///
/// Server-held-key encryption at rest: message bodies are sealed with a
/// single 256-bit AES-GCM key owned by the deployment (configuration,
/// not per-user). This is NOT end-to-end encryption — the server can
/// read message content; the goal is confidentiality and tamper
/// detection for data at rest.
pub mod codec;
pub mod keys;

pub use codec::{CryptoError, MessageCodec, Sealed};
pub use keys::{generate_key, key_from_base64, key_to_base64};
