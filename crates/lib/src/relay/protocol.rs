//! Relay wire protocol: roles, inbound envelopes, and outbound shapes.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// Envelope `type` that claims a role slot.
pub const REGISTER_TYPE: &str = "register";

/// Envelope `type` used when wrapping device traffic for the controller.
pub const SENSOR_DATA_TYPE: &str = "sensor_data";

/// One of the two peers the relay pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Device,
    Controller,
}

impl Role {
    /// Parse the `client` field of a registration envelope. Exact, case-sensitive match.
    pub fn from_client(client: &str) -> Option<Self> {
        match client {
            "device" => Some(Role::Device),
            "controller" => Some(Role::Controller),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Device => "device",
            Role::Controller => "controller",
        }
    }

    /// The role on the other end of a forward.
    pub fn counterpart(self) -> Self {
        match self {
            Role::Device => Role::Controller,
            Role::Controller => Role::Device,
        }
    }

    /// Human-readable reason sent when this role's slot is already taken.
    pub fn occupied_reason(self) -> String {
        let label = match self {
            Role::Device => "Device",
            Role::Controller => "Controller",
        };
        format!("{} already connected", label)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors decoding or encoding relay frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload is JSON null")]
    NullEnvelope,
}

/// What an inbound envelope asks the relay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// `type == "register"`. `None` when `client` is missing or not a known role.
    Register(Option<Role>),
    /// Anything else; routed by the sender's role.
    Data,
}

/// A decoded inbound payload. Any JSON value except `null` is accepted; only objects can be registrations.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope(Value);

impl Envelope {
    /// Parse a text frame.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        match serde_json::from_str(raw)? {
            Value::Null => Err(ProtocolError::NullEnvelope),
            v => Ok(Self(v)),
        }
    }

    /// Parse a binary frame (UTF-8 JSON).
    pub fn parse_bytes(raw: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::parse(text)
    }

    pub fn kind(&self) -> EnvelopeKind {
        if self.0.get("type").and_then(Value::as_str) != Some(REGISTER_TYPE) {
            return EnvelopeKind::Data;
        }
        let role = self
            .0
            .get("client")
            .and_then(Value::as_str)
            .and_then(Role::from_client);
        EnvelopeKind::Register(role)
    }

    /// Frame text the relay sends on behalf of `sender` to the counterpart.
    /// Device traffic is wrapped as `{"type":"sensor_data","data":E}`; controller traffic is passed through.
    pub fn forward_text(&self, sender: Role) -> Result<String, ProtocolError> {
        let text = match sender {
            Role::Device => serde_json::to_string(&json!({
                "type": SENSOR_DATA_TYPE,
                "data": &self.0,
            }))?,
            Role::Controller => serde_json::to_string(&self.0)?,
        };
        Ok(text)
    }
}

/// Registration envelope as a client sends it.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub client: Role,
}

impl RegisterRequest {
    pub fn new(role: Role) -> Self {
        Self {
            typ: REGISTER_TYPE.to_string(),
            client: role,
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_kind_for_known_roles() {
        let e = Envelope::parse(r#"{"type":"register","client":"device"}"#).unwrap();
        assert_eq!(e.kind(), EnvelopeKind::Register(Some(Role::Device)));
        let e = Envelope::parse(r#"{"client":"controller","type":"register"}"#).unwrap();
        assert_eq!(e.kind(), EnvelopeKind::Register(Some(Role::Controller)));
    }

    #[test]
    fn register_kind_with_unknown_or_missing_client() {
        for raw in [
            r#"{"type":"register","client":"esp32"}"#,
            r#"{"type":"register","client":"Device"}"#,
            r#"{"type":"register","client":7}"#,
            r#"{"type":"register"}"#,
        ] {
            let e = Envelope::parse(raw).unwrap();
            assert_eq!(e.kind(), EnvelopeKind::Register(None), "{}", raw);
        }
    }

    #[test]
    fn non_register_payloads_are_data() {
        for raw in [
            r#"{"type":"temp","value":22}"#,
            r#"{"cmd":"set_led","on":true}"#,
            r#"{"type":["register"]}"#,
            r#"[1,2,3]"#,
            r#"42"#,
        ] {
            let e = Envelope::parse(raw).unwrap();
            assert_eq!(e.kind(), EnvelopeKind::Data, "{}", raw);
        }
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(matches!(
            Envelope::parse("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::parse_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn null_payload_is_rejected() {
        assert!(matches!(Envelope::parse("null"), Err(ProtocolError::NullEnvelope)));
        assert!(matches!(Envelope::parse(" null "), Err(ProtocolError::NullEnvelope)));
        assert!(matches!(Envelope::parse_bytes(b"null"), Err(ProtocolError::NullEnvelope)));
        assert!(Envelope::parse(r#"{"v":null}"#).is_ok());
    }

    #[test]
    fn device_traffic_is_wrapped() {
        let e = Envelope::parse(r#"{"type":"temp","value":22}"#).unwrap();
        assert_eq!(
            e.forward_text(Role::Device).unwrap(),
            r#"{"type":"sensor_data","data":{"type":"temp","value":22}}"#
        );
    }

    #[test]
    fn controller_traffic_passes_through_with_key_order() {
        let e = Envelope::parse(r#"{"cmd":"set_led","on":true,"a":[1,{"z":1,"b":2}]}"#).unwrap();
        assert_eq!(
            e.forward_text(Role::Controller).unwrap(),
            r#"{"cmd":"set_led","on":true,"a":[1,{"z":1,"b":2}]}"#
        );
    }

    #[test]
    fn occupied_reason_names_role() {
        assert_eq!(Role::Device.occupied_reason(), "Device already connected");
        assert_eq!(Role::Controller.occupied_reason(), "Controller already connected");
        assert_eq!(Role::Device.counterpart(), Role::Controller);
    }

    #[test]
    fn register_request_wire_shape() {
        assert_eq!(
            RegisterRequest::new(Role::Controller).to_text().unwrap(),
            r#"{"type":"register","client":"controller"}"#
        );
    }
}
