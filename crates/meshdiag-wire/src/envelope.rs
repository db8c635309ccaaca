//! Peer message envelope
//!
//! Inbound bytes are untrusted. `Envelope::classify` never fails: anything
//! that is not a well-formed probe, response or command becomes
//! `Envelope::Unknown` carrying the reason, so the dispatcher handles
//! garbage in exactly one place.

use bytes::Bytes;
use serde_json::{Map, Value};

use meshdiag_core::{DiagError, DiagResult, StatusReport, TransactionId};

/// Opcode asking a peer for its local connectivity view
pub const OPCODE_PROBE: &str = "testP2PConnection";

/// Opcode carrying the answer to a probe
pub const OPCODE_RESPONSE: &str = "response";

/// Default channel tag for diagnostics traffic
pub const DIAGNOSTICS_CHANNEL: &str = "diagnostics";

/// Maximum accepted envelope size before parsing
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;

const FIELD_OPCODE: &str = "opcode";
const FIELD_ID: &str = "id";
const FIELD_DATA: &str = "data";
const FIELD_CMD_DATA: &str = "cmdData";

/// Closed set of envelope shapes
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// Connectivity probe: "tell me your view of the room"
    Probe { id: TransactionId },
    /// Reply to one of our probes
    Response {
        id: TransactionId,
        report: StatusReport,
    },
    /// Application command, opaque to diagnostics
    Command { opcode: String, cmd_data: Value },
    /// Anything else; never encoded, only produced by `classify`
    Unknown {
        opcode: Option<String>,
        reason: DiagError,
    },
}

impl Envelope {
    pub fn probe(id: TransactionId) -> Self {
        Envelope::Probe { id }
    }

    pub fn response(id: TransactionId, report: StatusReport) -> Self {
        Envelope::Response { id, report }
    }

    pub fn command(opcode: impl Into<String>, cmd_data: Value) -> Self {
        Envelope::Command {
            opcode: opcode.into(),
            cmd_data,
        }
    }

    /// Opcode string, if the envelope has one
    pub fn opcode(&self) -> Option<&str> {
        match self {
            Envelope::Probe { .. } => Some(OPCODE_PROBE),
            Envelope::Response { .. } => Some(OPCODE_RESPONSE),
            Envelope::Command { opcode, .. } => Some(opcode),
            Envelope::Unknown { opcode, .. } => opcode.as_deref(),
        }
    }

    /// Transaction id carried by probes and responses
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            Envelope::Probe { id } | Envelope::Response { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Classify raw inbound bytes
    pub fn classify(buf: &[u8]) -> Self {
        if buf.len() > MAX_ENVELOPE_SIZE {
            return Self::unknown(
                None,
                DiagError::EnvelopeTooLarge {
                    size: buf.len(),
                    max: MAX_ENVELOPE_SIZE,
                },
            );
        }

        match serde_json::from_slice::<Value>(buf) {
            Ok(value) => Self::classify_value(value),
            Err(e) => Self::unknown(None, DiagError::InvalidEnvelope(e.to_string())),
        }
    }

    /// Classify an already-parsed JSON value
    pub fn classify_value(value: Value) -> Self {
        let Value::Object(mut obj) = value else {
            return Self::unknown(None, DiagError::InvalidEnvelope("not an object".into()));
        };

        let opcode = match obj.remove(FIELD_OPCODE) {
            Some(Value::String(s)) => s,
            Some(_) => {
                return Self::unknown(
                    None,
                    DiagError::InvalidEnvelope("opcode is not a string".into()),
                )
            }
            None => return Self::unknown(None, DiagError::InvalidEnvelope("missing opcode".into())),
        };

        if opcode == OPCODE_PROBE {
            return match take_id(&mut obj) {
                Ok(id) => Envelope::Probe { id },
                Err(reason) => Self::unknown(Some(opcode), reason),
            };
        }

        if opcode == OPCODE_RESPONSE {
            let id = match take_id(&mut obj) {
                Ok(id) => id,
                Err(reason) => return Self::unknown(Some(opcode), reason),
            };
            let Some(data) = obj.remove(FIELD_DATA) else {
                return Self::unknown(
                    Some(opcode),
                    DiagError::InvalidEnvelope("response without data".into()),
                );
            };
            return match serde_json::from_value::<StatusReport>(data) {
                Ok(report) => Envelope::Response { id, report },
                Err(e) => Self::unknown(
                    Some(opcode),
                    DiagError::InvalidEnvelope(format!("bad response data: {}", e)),
                ),
            };
        }

        if opcode.is_empty() {
            return Self::unknown(Some(opcode), DiagError::UnknownOperation(String::new()));
        }

        let cmd_data = obj.remove(FIELD_CMD_DATA).unwrap_or(Value::Null);
        Envelope::Command { opcode, cmd_data }
    }

    /// Strict decode: unknown shapes are errors
    pub fn decode(buf: &[u8]) -> DiagResult<Self> {
        match Self::classify(buf) {
            Envelope::Unknown { reason, .. } => Err(reason),
            envelope => Ok(envelope),
        }
    }

    /// Encode to JSON bytes
    pub fn encode(&self) -> DiagResult<Bytes> {
        let mut obj = Map::new();
        match self {
            Envelope::Probe { id } => {
                obj.insert(FIELD_OPCODE.into(), OPCODE_PROBE.into());
                obj.insert(FIELD_ID.into(), id.get().into());
            }
            Envelope::Response { id, report } => {
                obj.insert(FIELD_OPCODE.into(), OPCODE_RESPONSE.into());
                obj.insert(FIELD_ID.into(), id.get().into());
                let data = serde_json::to_value(report)
                    .map_err(|e| DiagError::InvalidEnvelope(e.to_string()))?;
                obj.insert(FIELD_DATA.into(), data);
            }
            Envelope::Command { opcode, cmd_data } => {
                if opcode.is_empty() || opcode == OPCODE_PROBE || opcode == OPCODE_RESPONSE {
                    return Err(DiagError::InvalidEnvelope(format!(
                        "reserved or empty command opcode {:?}",
                        opcode
                    )));
                }
                obj.insert(FIELD_OPCODE.into(), opcode.clone().into());
                if !cmd_data.is_null() {
                    obj.insert(FIELD_CMD_DATA.into(), cmd_data.clone());
                }
            }
            Envelope::Unknown { .. } => {
                return Err(DiagError::InvalidEnvelope(
                    "unknown envelope cannot be encoded".into(),
                ))
            }
        }

        let bytes =
            serde_json::to_vec(&obj).map_err(|e| DiagError::InvalidEnvelope(e.to_string()))?;
        if bytes.len() > MAX_ENVELOPE_SIZE {
            return Err(DiagError::EnvelopeTooLarge {
                size: bytes.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }
        Ok(Bytes::from(bytes))
    }

    fn unknown(opcode: Option<String>, reason: DiagError) -> Self {
        Envelope::Unknown { opcode, reason }
    }
}

fn take_id(obj: &mut Map<String, Value>) -> DiagResult<TransactionId> {
    match obj.remove(FIELD_ID) {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(TransactionId::new)
            .ok_or_else(|| DiagError::InvalidEnvelope(format!("id {} is not a u64", n))),
        Some(_) => Err(DiagError::InvalidEnvelope("id is not a number".into())),
        None => Err(DiagError::InvalidEnvelope("missing id".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdiag_core::{ConnectionStatus, PeerId, StatusMap};
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_report() -> StatusReport {
        let mut data = StatusMap::new();
        data.insert(PeerId::new("c"), ConnectionStatus::Connected);
        data.insert(PeerId::new("d"), ConnectionStatus::Other("odd".into()));
        StatusReport::new(PeerId::new("a"), data)
    }

    #[test]
    fn test_probe_wire_shape() {
        let bytes = Envelope::probe(TransactionId::new(7)).encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({ "opcode": "testP2PConnection", "id": 7 }));
    }

    #[test]
    fn test_response_roundtrip() {
        let env = Envelope::response(TransactionId::new(3), sample_report());
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_command_passthrough() {
        let raw = json!({ "opcode": "chat", "cmdData": { "text": "hi" } });
        let env = Envelope::classify(raw.to_string().as_bytes());
        assert_eq!(env, Envelope::command("chat", json!({ "text": "hi" })));
        assert_eq!(env.opcode(), Some("chat"));
        assert_eq!(env.transaction_id(), None);
    }

    #[test]
    fn test_missing_or_wrong_typed_opcode() {
        for raw in [json!({ "id": 1 }), json!({ "opcode": 5, "id": 1 }), json!([1, 2])] {
            let env = Envelope::classify(raw.to_string().as_bytes());
            assert!(matches!(env, Envelope::Unknown { opcode: None, .. }), "{:?}", env);
        }
    }

    #[test]
    fn test_probe_requires_numeric_id() {
        for raw in [
            json!({ "opcode": "testP2PConnection" }),
            json!({ "opcode": "testP2PConnection", "id": "1" }),
            json!({ "opcode": "testP2PConnection", "id": -1 }),
            json!({ "opcode": "testP2PConnection", "id": 1.5 }),
        ] {
            let env = Envelope::classify(raw.to_string().as_bytes());
            assert!(
                matches!(env, Envelope::Unknown { opcode: Some(ref op), .. } if op == OPCODE_PROBE),
                "{:?}",
                env
            );
        }
    }

    #[test]
    fn test_response_requires_report() {
        let no_data = json!({ "opcode": "response", "id": 1 });
        assert!(Envelope::decode(no_data.to_string().as_bytes()).is_err());

        let bad_data = json!({ "opcode": "response", "id": 1, "data": { "data": 3 } });
        assert!(Envelope::decode(bad_data.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_oversized_envelope_rejected() {
        let buf = vec![b' '; MAX_ENVELOPE_SIZE + 1];
        assert_eq!(
            Envelope::decode(&buf),
            Err(DiagError::EnvelopeTooLarge {
                size: MAX_ENVELOPE_SIZE + 1,
                max: MAX_ENVELOPE_SIZE
            })
        );
    }

    #[test]
    fn test_reserved_command_opcode_not_encodable() {
        assert!(Envelope::command(OPCODE_RESPONSE, Value::Null).encode().is_err());
        assert!(Envelope::command("", Value::Null).encode().is_err());
    }

    proptest! {
        #[test]
        fn classify_never_panics(buf in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = Envelope::classify(&buf);
        }

        #[test]
        fn probe_id_survives_encoding(id in any::<u64>()) {
            let env = Envelope::probe(TransactionId::new(id));
            let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded.transaction_id(), Some(TransactionId::new(id)));
        }
    }
}
