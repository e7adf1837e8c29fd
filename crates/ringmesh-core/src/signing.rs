//! Message signing
//!
//! Signing internals belong to the cloud. The router and validators only
//! need to ask "what signature should this message carry?" and compare.

use tracing::warn;

use crate::message::Message;

/// Produces the expected signature for a message
pub trait Signer: Send + Sync {
    /// Signature for `message`, or `None` for an unsigned cloud
    fn sign(&self, message: &Message) -> Option<Vec<u8>>;
}

/// Signer of an unsigned cloud
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsigned;

impl Signer for Unsigned {
    fn sign(&self, _message: &Message) -> Option<Vec<u8>> {
        None
    }
}

/// Keyed BLAKE3 MAC over a message's canonical bytes
///
/// Every agent of the cloud shares the key.
#[derive(Clone)]
pub struct KeyedSigner {
    key: [u8; 32],
}

impl KeyedSigner {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the key from a shared secret phrase
    pub fn from_secret(secret: &str) -> Self {
        Self::new(blake3::derive_key("ringmesh cloud signing key v1", secret.as_bytes()))
    }
}

impl std::fmt::Debug for KeyedSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedSigner").finish_non_exhaustive()
    }
}

impl Signer for KeyedSigner {
    fn sign(&self, message: &Message) -> Option<Vec<u8>> {
        match message.signing_bytes() {
            Ok(bytes) => Some(blake3::keyed_hash(&self.key, &bytes).as_bytes().to_vec()),
            Err(e) => {
                warn!(message_id = %message.uuid(), error = %e, "Failed to encode message for signing");
                None
            }
        }
    }
}

/// Short hex form of a signature for logs
pub fn signature_hint(signature: Option<&[u8]>) -> String {
    match signature {
        Some(sig) => hex::encode(&sig[..sig.len().min(6)]),
        None => "unsigned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Iden;
    use crate::message::{MessageType, Payload};

    fn make_message() -> Message {
        Message::new(MessageType::Ping, Iden::agent(), Iden::agent(), Payload::Null)
    }

    #[test]
    fn test_keyed_signer_is_deterministic() {
        let signer = KeyedSigner::from_secret("correct horse");
        let msg = make_message();
        assert_eq!(signer.sign(&msg), signer.sign(&msg.with_hops(1)));
        assert_eq!(signer.sign(&msg).map(|s| s.len()), Some(32));
    }

    #[test]
    fn test_different_keys_disagree() {
        let msg = make_message();
        let a = KeyedSigner::from_secret("a");
        let b = KeyedSigner::from_secret("b");
        assert_ne!(a.sign(&msg), b.sign(&msg));
    }

    #[test]
    fn test_unsigned() {
        assert!(Unsigned.sign(&make_message()).is_none());
        assert_eq!(signature_hint(None), "unsigned");
        assert_eq!(signature_hint(Some(&[0xab, 0xcd])), "abcd");
    }
}
