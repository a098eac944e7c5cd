//! Canonical encoding of a message for reference computation.
//!
//! The encoded body is a fixed record: every payload field except `link`, in
//! a fixed declaration order, absent options written as explicit nulls.
//! There are no floats among the fixed fields; `messageObj` is carried as
//! IPLD, whose DAG-CBOR form sorts map keys canonically (RFC 8949 §4.2.1).
//!
//! `link` is excluded because it is derived from the reference itself
//! (`previous:<reference>`), and legacy nodes carry links in an older scheme
//! that migration rewrites.

use ipld_core::ipld::Ipld;
use serde::Serialize;

use crate::payload::{CodecError, Payload};

#[derive(Serialize)]
struct CanonicalBody<'a> {
    #[serde(rename = "fromDID")]
    from_did: &'a str,
    #[serde(rename = "toDID")]
    to_did: &'a str,
    #[serde(rename = "fromCAIP10")]
    from_caip10: &'a str,
    #[serde(rename = "toCAIP10")]
    to_caip10: &'a str,
    #[serde(rename = "messageContent")]
    message_content: &'a str,
    #[serde(rename = "messageObj")]
    message_obj: Option<&'a Ipld>,
    #[serde(rename = "messageType")]
    message_type: &'a str,
    signature: &'a str,
    #[serde(rename = "sigType")]
    sig_type: &'a str,
    #[serde(rename = "verificationProof")]
    verification_proof: Option<&'a str>,
    #[serde(rename = "encType")]
    enc_type: &'a str,
    #[serde(rename = "sessionKey")]
    session_key: Option<&'a str>,
    #[serde(rename = "encryptedSecret")]
    encrypted_secret: Option<&'a str>,
    timestamp: Option<i64>,
}

impl<'a> From<&'a Payload> for CanonicalBody<'a> {
    fn from(p: &'a Payload) -> Self {
        CanonicalBody {
            from_did: &p.from_did,
            to_did: &p.to_did,
            from_caip10: &p.from_caip10,
            to_caip10: &p.to_caip10,
            message_content: &p.message_content,
            message_obj: p.message_obj.as_ref(),
            message_type: &p.message_type,
            signature: &p.signature,
            sig_type: &p.sig_type,
            verification_proof: p.verification_proof.as_deref(),
            enc_type: &p.enc_type,
            session_key: p.session_key.as_deref(),
            encrypted_secret: p.encrypted_secret.as_deref(),
            timestamp: p.timestamp,
        }
    }
}

/// Encodes the canonical bytes of a message.
pub fn encode(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    serde_ipld_dagcbor::to_vec(&CanonicalBody::from(payload)).map_err(|e| CodecError(e.to_string()))
}
