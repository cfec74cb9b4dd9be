//! Integration test: JSON shape of the CCP messages a running service emits.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use meridian_core::{AccountId, AccountInfo, Relation};
use meridian_integration_tests::{eventually, CONVERGENCE};
use meridian_routing::{
    AccountRegistry, BroadcasterConfig, CcpTransport, Mode, RouteControlRequest, RouteUpdateRequest,
    RoutingError, RoutingHandle, RoutingSecret, RoutingService,
};

/// Transport that records every message as serialized JSON.
#[derive(Default)]
struct JsonRecorder {
    controls: Mutex<Vec<Value>>,
    updates: Mutex<Vec<Value>>,
}

#[async_trait]
impl CcpTransport for JsonRecorder {
    fn is_connected(&self, _account: &AccountId) -> bool {
        true
    }

    async fn send_route_control(
        &self,
        _account: &AccountId,
        request: RouteControlRequest,
    ) -> Result<(), RoutingError> {
        let json = serde_json::to_value(&request).map_err(|e| RoutingError::Transport(e.to_string()))?;
        self.controls.lock().unwrap().push(json);
        Ok(())
    }

    async fn send_route_update(
        &self,
        _account: &AccountId,
        request: RouteUpdateRequest,
    ) -> Result<(), RoutingError> {
        let json = serde_json::to_value(&request).map_err(|e| RoutingError::Transport(e.to_string()))?;
        self.updates.lock().unwrap().push(json);
        Ok(())
    }
}

fn make_service(recorder: Arc<JsonRecorder>) -> RoutingHandle {
    let config = BroadcasterConfig {
        own_address: "g.hub".into(),
        routing_secret: Some(RoutingSecret::from_bytes([7u8; 32])),
        broadcast_interval: Duration::from_secs(5),
        ..BroadcasterConfig::default()
    };
    let accounts = Arc::new(AccountRegistry::from_accounts(vec![AccountInfo::new(
        AccountId::from("peer"),
        Relation::Peer,
    )]));
    RoutingService::spawn(config, accounts, recorder)
}

#[tokio::test]
async fn test_route_control_json() {
    let recorder = Arc::new(JsonRecorder::default());
    let _handle = make_service(recorder.clone());

    let node = &recorder;
    assert!(eventually(CONVERGENCE, move || async move { !node.controls.lock().unwrap().is_empty() }).await);

    let control = recorder.controls.lock().unwrap()[0].clone();
    assert_eq!(control["mode"], "SYNC");
    assert_eq!(control["lastKnownRoutingTableId"], Uuid::nil().to_string());
    assert_eq!(control["lastKnownEpoch"], 0);
    assert!(control["features"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_route_update_json() {
    let recorder = Arc::new(JsonRecorder::default());
    let handle = make_service(recorder.clone());

    handle
        .handle_route_control(
            AccountId::from("peer"),
            RouteControlRequest {
                mode: Mode::Sync,
                last_known_routing_table_id: Uuid::nil(),
                last_known_epoch: 0,
                features: vec![],
            },
        )
        .await
        .unwrap();

    let node = &recorder;
    assert!(eventually(CONVERGENCE, move || async move { !node.updates.lock().unwrap().is_empty() }).await);

    let status = handle.status().await.unwrap();
    let update = recorder.updates.lock().unwrap()[0].clone();
    assert_eq!(update["speaker"], "g.hub");
    assert_eq!(update["routingTableId"], status.routing_table_id.to_string());
    assert_eq!(update["holdDownTime"], 45_000);
    assert_eq!(update["fromEpochIndex"], 0);
    assert_eq!(update["toEpochIndex"], update["currentEpochIndex"]);
    assert!(update["withdrawnRoutes"].as_array().unwrap().is_empty());

    let routes = update["newRoutes"].as_array().unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0]["prefix"], "g.hub");
    assert_eq!(routes[0]["path"], serde_json::json!(["g.hub"]));
    let auth = routes[0]["auth"].as_str().unwrap();
    assert_eq!(auth.len(), 64);
    assert!(auth.chars().all(|c| c.is_ascii_hexdigit()));
    // The next hop never leaves the node.
    assert!(routes[0].get("nextHop").is_none());
}

#[test]
fn test_inbound_update_parses() {
    let json = r#"{
        "speaker": "g.remote",
        "routingTableId": "0191d2a4-3b2c-7000-8000-000000000001",
        "holdDownTime": 30000,
        "currentEpochIndex": 2,
        "fromEpochIndex": 0,
        "toEpochIndex": 2,
        "newRoutes": [
            {
                "prefix": "g.remote",
                "path": ["g.remote"],
                "auth": "0000000000000000000000000000000000000000000000000000000000000000"
            }
        ],
        "withdrawnRoutes": ["g.gone"]
    }"#;
    let update: RouteUpdateRequest = serde_json::from_str(json).unwrap();
    assert_eq!(update.speaker, "g.remote");
    assert_eq!(update.hold_down_time, 30_000);
    assert_eq!(update.new_routes[0].path, vec!["g.remote".to_string()]);
    assert_eq!(update.withdrawn_routes, vec!["g.gone".to_string()]);

    let bad_auth = json.replace(&"0".repeat(64), "zz");
    assert!(serde_json::from_str::<RouteUpdateRequest>(&bad_auth).is_err());
}
