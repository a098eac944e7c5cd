use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};

/// Error while encoding or decoding message bytes.
#[derive(Debug, thiserror::Error)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

/// The body of a chat message.
///
/// Field names on the wire follow the protocol's message object
/// (`fromDID`, `messageObj`, ...). Every field is optional on decode so that
/// legacy nodes with partial shapes still materialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    #[serde(rename = "fromDID")]
    pub from_did: String,
    #[serde(rename = "toDID")]
    pub to_did: String,
    #[serde(rename = "fromCAIP10")]
    pub from_caip10: String,
    #[serde(rename = "toCAIP10")]
    pub to_caip10: String,
    #[serde(rename = "messageContent")]
    pub message_content: String,
    #[serde(rename = "messageObj", skip_serializing_if = "Option::is_none")]
    pub message_obj: Option<Ipld>,
    #[serde(rename = "messageType")]
    pub message_type: String,
    pub signature: String,
    #[serde(rename = "sigType")]
    pub sig_type: String,
    #[serde(rename = "verificationProof", skip_serializing_if = "Option::is_none")]
    pub verification_proof: Option<String>,
    #[serde(rename = "encType")]
    pub enc_type: String,
    #[serde(rename = "sessionKey", skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(rename = "encryptedSecret", skip_serializing_if = "Option::is_none")]
    pub encrypted_secret: Option<String>,
    /// Epoch milliseconds, author-supplied. Absent on the oldest legacy nodes.
    pub timestamp: Option<i64>,
    /// Handle of the preceding message, or `None` for a conversation root.
    pub link: Option<String>,
}

impl Payload {
    /// Serializes this payload to DAG-CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| CodecError(e.to_string()))
    }

    /// Deserializes a payload from DAG-CBOR bytes.
    pub fn from_cbor(data: &[u8]) -> Result<Self, CodecError> {
        serde_ipld_dagcbor::from_slice(data).map_err(|e| CodecError(e.to_string()))
    }

    /// Serializes this payload to JSON, the legacy file cache format.
    pub fn to_json(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError(e.to_string()))
    }

    /// Deserializes a payload from JSON.
    pub fn from_json(data: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError(e.to_string()))
    }
}
