//! Wire messages exchanged with the memory bridge.
//!
//! Requests are JSON text frames. `DeviceList` and `Info` are answered with a
//! JSON `{"Results": [...]}` text frame; `GetAddress` is answered with the raw
//! memory as binary frames; `Attach` has no reply.

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Default bridge endpoint (QUsb2Snes and compatible servers).
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080";

/// Bridge command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    DeviceList,
    Attach,
    Info,
    GetAddress,
}

/// Address space a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Space {
    #[serde(rename = "SNES")]
    Snes,
}

/// A request sent to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    pub opcode: Opcode,
    pub space: Space,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<String>,
}

impl Request {
    fn new(opcode: Opcode, operands: Vec<String>) -> Self {
        Self {
            opcode,
            space: Space::Snes,
            operands,
        }
    }

    pub fn device_list() -> Self {
        Self::new(Opcode::DeviceList, Vec::new())
    }

    pub fn attach(device: impl Into<String>) -> Self {
        Self::new(Opcode::Attach, vec![device.into()])
    }

    pub fn info() -> Self {
        Self::new(Opcode::Info, Vec::new())
    }

    /// Read `len` bytes starting at `address`. Operands are hex strings.
    pub fn get_address(address: u32, len: usize) -> Self {
        Self::new(
            Opcode::GetAddress,
            vec![format!("0x{:06X}", address), format!("0x{:02X}", len)],
        )
    }

    /// Whether the bridge sends a reply to this request.
    pub fn expects_reply(&self) -> bool {
        !matches!(self.opcode, Opcode::Attach)
    }
}

/// `{"Results": [...]}` reply to `DeviceList` and `Info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultsReply {
    pub results: Vec<String>,
}

impl ResultsReply {
    pub fn parse(text: &str) -> Result<Self, TrackerError> {
        serde_json::from_str(text).map_err(|e| TrackerError::Protocol(e.to_string()))
    }
}

/// An incoming frame, independent of the socket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMessage {
    Text(String),
    Binary(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_list_json() {
        let value = serde_json::to_value(Request::device_list()).unwrap();
        assert_eq!(value, json!({"Opcode": "DeviceList", "Space": "SNES"}));
    }

    #[test]
    fn test_attach_json() {
        let value = serde_json::to_value(Request::attach("SD2SNES COM3")).unwrap();
        assert_eq!(
            value,
            json!({"Opcode": "Attach", "Space": "SNES", "Operands": ["SD2SNES COM3"]})
        );
    }

    #[test]
    fn test_get_address_hex_operands() {
        let party = Request::get_address(0xF52980, 0x09);
        assert_eq!(party.operands, vec!["0xF52980", "0x09"]);

        let equipment = Request::get_address(0xF52600, 0x230);
        assert_eq!(equipment.operands, vec!["0xF52600", "0x230"]);

        let value = serde_json::to_value(&party).unwrap();
        assert_eq!(value["Opcode"], "GetAddress");
    }

    #[test]
    fn test_only_attach_has_no_reply() {
        assert!(!Request::attach("x").expects_reply());
        assert!(Request::info().expects_reply());
        assert!(Request::device_list().expects_reply());
        assert!(Request::get_address(0, 1).expects_reply());
    }

    #[test]
    fn test_results_reply_parse() {
        let reply = ResultsReply::parse(r#"{"Results":["EMU SNES9X","SD2SNES"]}"#).unwrap();
        assert_eq!(reply.results, vec!["EMU SNES9X", "SD2SNES"]);

        let empty = ResultsReply::parse(r#"{"Results":[]}"#).unwrap();
        assert!(empty.results.is_empty());
    }

    #[test]
    fn test_results_reply_missing_field_is_protocol_error() {
        let err = ResultsReply::parse(r#"{"Devices":[]}"#).unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(_)));
        assert!(ResultsReply::parse("not json").is_err());
    }
}
