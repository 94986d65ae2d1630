//! DSSE envelopes.
//!
//! Signatures are computed over the pre-authentication encoding (PAE) of the
//! payload type and the raw payload bytes, never over the base64 text.

use serde::{Deserialize, Serialize};

use crate::canonical::{b64_decode, b64_encode, to_canonical_vec};
use crate::error::{ProtocolError, ProtocolResult};
use crate::statement::Statement;

/// Payload type for in-toto statements.
pub const DSSE_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// One signature over the envelope PAE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Key hint (fingerprint of the signing key); informational only
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyid: String,

    /// Base64-encoded signature bytes
    pub sig: String,
}

/// DSSE envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64-encoded payload
    pub payload: String,

    #[serde(rename = "payloadType")]
    pub payload_type: String,

    pub signatures: Vec<EnvelopeSignature>,
}

/// DSSE v1 pre-authentication encoding.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    out.extend_from_slice(b"DSSEv1 ");
    out.extend_from_slice(payload_type.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

impl Envelope {
    /// Unsigned envelope around the canonical JSON of a statement.
    pub fn for_statement(statement: &Statement) -> ProtocolResult<Self> {
        let payload = to_canonical_vec(statement)?;
        Ok(Self {
            payload: b64_encode(&payload),
            payload_type: DSSE_PAYLOAD_TYPE.to_string(),
            signatures: Vec::new(),
        })
    }

    pub fn payload_bytes(&self) -> ProtocolResult<Vec<u8>> {
        b64_decode(&self.payload)
    }

    /// Bytes a signer must sign.
    pub fn signing_input(&self) -> ProtocolResult<Vec<u8>> {
        Ok(pae(&self.payload_type, &self.payload_bytes()?))
    }

    pub fn add_signature(&mut self, keyid: String, signature: &[u8]) {
        self.signatures.push(EnvelopeSignature {
            keyid,
            sig: b64_encode(signature),
        });
    }

    /// Decode the payload as an in-toto statement.
    pub fn statement(&self) -> ProtocolResult<Statement> {
        if self.payload_type != DSSE_PAYLOAD_TYPE {
            return Err(ProtocolError::PayloadType {
                expected: DSSE_PAYLOAD_TYPE.to_string(),
                actual: self.payload_type.clone(),
            });
        }
        Statement::from_slice(&self.payload_bytes()?)
    }
}
