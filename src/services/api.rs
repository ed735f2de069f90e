//! API request and response types for the HTTP surface.

use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterSnapshot, HardwareDevice};
use crate::automation::RunningAutomation;
use crate::layout::{NodeId, RouteId, RouteObject, TurnoutState};
use crate::locos::{Loco, LocoIdentifier};
use crate::traits::Direction;

// ============================================================================
// Response Types
// ============================================================================

/// API response wrapper for consistent JSON structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (present when success=true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present when success=false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Overview of the whole controller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    /// Active driver and device
    pub hardware: AdapterSnapshot,
    /// Track power
    pub track_power: bool,
    /// Every registered loco
    pub locos: Vec<Loco>,
    /// Live automations
    pub running: Vec<RunningAutomation>,
}

/// Driver choices and the active device
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareResponse {
    /// Active driver and device
    pub active: AdapterSnapshot,
    /// Driver names that can be selected
    pub drivers: Vec<String>,
    /// Devices that can be selected
    pub devices: Vec<HardwareDevice>,
}

/// A route that was set
#[derive(Debug, Clone, Serialize)]
pub struct RouteResponse {
    /// Route id, used to clear it
    pub id: RouteId,
    /// Endpoints, turnouts and links
    pub route: RouteObject,
}

/// Ids of scripts added by an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Script ids in file order
    pub ids: Vec<i64>,
}

// ============================================================================
// Request Types
// ============================================================================

/// POST /api/turnouts/:id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetTurnoutRequest {
    /// Requested blade position
    pub state: TurnoutState,
}

/// POST /api/routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRouteRequest {
    /// Start destination
    pub start: NodeId,
    /// End destination
    pub end: NodeId,
}

/// POST /api/locos
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLocoRequest {
    /// Display name
    pub name: String,
    /// DCC address
    pub address: u16,
}

/// PUT /api/locos/:identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditLocoRequest {
    /// New display name
    #[serde(default)]
    pub name: Option<String>,
    /// New DCC address
    #[serde(default)]
    pub address: Option<u16>,
}

/// POST /api/throttle/:identifier/speed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSpeedRequest {
    /// Speed step (clamped to 126)
    pub speed: u8,
}

/// POST /api/throttle/:identifier/direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDirectionRequest {
    /// New direction
    pub direction: Direction,
}

/// POST /api/throttle/:identifier/function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFunctionRequest {
    /// Function number (0-28)
    pub function: u8,
    /// On or off
    pub state: bool,
}

/// POST /api/power
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPowerRequest {
    /// On or off
    pub state: bool,
}

/// POST /api/automations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Script file text
    pub script: String,
}

/// PUT /api/automations/:id/description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionRequest {
    /// New description
    pub description: String,
}

/// POST /api/automations/:id/run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    /// Loco to bind (address or name)
    #[serde(default)]
    pub loco: Option<LocoIdentifier>,
}

/// POST /api/hardware/driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectDriverRequest {
    /// Driver name ("Virtual" or "DCC-EX")
    pub driver: String,
    /// Station address for network drivers
    #[serde(default)]
    pub address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_envelope() {
        let ok = serde_json::to_value(ApiResponse::ok(UploadResponse { ids: vec![1, 2] })).unwrap();
        assert_eq!(ok, serde_json::json!({ "success": true, "data": { "ids": [1, 2] } }));

        let err = serde_json::to_value(ApiResponse::<()>::err("Bad route")).unwrap();
        assert_eq!(err, serde_json::json!({ "success": false, "error": "Bad route" }));
    }

    // ===== Request Types Tests =====

    #[test]
    fn run_request_accepts_address_or_name() {
        let req: RunRequest = serde_json::from_str(r#"{"loco": 3}"#).unwrap();
        assert_eq!(req.loco, Some(LocoIdentifier::Address(3)));
        let req: RunRequest = serde_json::from_str(r#"{"loco": "Flyer"}"#).unwrap();
        assert_eq!(req.loco, Some(LocoIdentifier::Name("Flyer".into())));
        let req: RunRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.loco, None);
    }

    #[test]
    fn edit_request_fields_are_optional() {
        let req: EditLocoRequest = serde_json::from_str(r#"{"address": 7}"#).unwrap();
        assert_eq!(req.name, None);
        assert_eq!(req.address, Some(7));
    }

    #[test]
    fn throttle_requests() {
        let req: SetDirectionRequest = serde_json::from_str(r#"{"direction": "reverse"}"#).unwrap();
        assert_eq!(req.direction, Direction::Reverse);
        assert!(serde_json::from_str::<SetSpeedRequest>(r#"{"speed": 300}"#).is_err());
        let req: SetTurnoutRequest = serde_json::from_str(r#"{"state": "thrown"}"#).unwrap();
        assert_eq!(req.state, TurnoutState::Thrown);
    }
}
