// Integration tests for `QueryClient` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ridelink_api::query::{ConfirmParams, NearbyAgentsParams};
use ridelink_api::{Error, QueryClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, QueryClient) {
    let server = MockServer::start().await;
    let client = QueryClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

fn nearby_params(radius_km: f64, attempt_token: u64) -> NearbyAgentsParams {
    NearbyAgentsParams {
        ride_id: "r-1".into(),
        latitude: 52.52,
        longitude: 13.405,
        radius_km,
        attempt_token,
        priority: "normal".into(),
    }
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_get_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rides/r-1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "id": "r-1", "status": "arriving", "version": 7, "driverId": "d-4" }
        })))
        .mount(&server)
        .await;

    let reply = client.get_status("r-1").await.unwrap();

    assert_eq!(reply.id, "r-1");
    assert_eq!(reply.status, "arriving");
    assert_eq!(reply.version, Some(7));
    assert_eq!(reply.extra["driverId"], "d-4");
}

#[tokio::test]
async fn test_get_nearby_agents_sends_radius_and_token() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rides/r-1/nearby-agents"))
        .and(body_partial_json(json!({ "radiusKm": 7.0, "attemptToken": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [
                { "id": "d-1", "name": "Ana", "distance": 1.4, "rating": 4.9, "eta": 240 },
                { "id": "d-2", "distance": 3.1 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agents = client.get_nearby_agents(&nearby_params(7.0, 2)).await.unwrap();

    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0].name.as_deref(), Some("Ana"));
    assert_eq!(agents[0].eta, Some(240));
    assert_eq!(agents[1].rating, None);
}

#[tokio::test]
async fn test_get_nearby_agents_empty_list() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rides/r-1/nearby-agents"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": [] })),
        )
        .mount(&server)
        .await;

    let agents = client.get_nearby_agents(&nearby_params(5.0, 1)).await.unwrap();
    assert!(agents.is_empty());
}

#[tokio::test]
async fn test_confirm_agent_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rides/r-1/confirm"))
        .and(body_partial_json(json!({ "agentId": "d-1", "attemptToken": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "accepted": false, "reason": "driver went offline" }
        })))
        .mount(&server)
        .await;

    let reply = client
        .confirm_agent(
            "r-1",
            &ConfirmParams {
                agent_id: "d-1".into(),
                attempt_token: 3,
            },
        )
        .await
        .unwrap();

    assert!(!reply.accepted);
    assert_eq!(reply.reason.as_deref(), Some("driver went offline"));
    assert!(reply.ride.is_none());
}

#[tokio::test]
async fn test_cancel_without_data() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rides/r-1/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    client.cancel("r-1").await.unwrap();
}

// ── Error tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_error_401_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rides/r-1/status"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.get_status("r-1").await;
    let err = result.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }), "got {err:?}");
    assert!(err.is_auth_rejected());
}

#[tokio::test]
async fn test_error_backend_refusal() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rides/r-404/status"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "success": false,
            "error": "ride not found"
        })))
        .mount(&server)
        .await;

    let result = client.get_status("r-404").await;
    assert!(
        matches!(
            result,
            Err(Error::Api { ref message, status: Some(404) }) if message == "ride not found"
        ),
        "got {result:?}"
    );
}

#[tokio::test]
async fn test_error_cancel_refused() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rides/r-1/cancel"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "success": false,
            "error": "ride already completed"
        })))
        .mount(&server)
        .await;

    let err = client.cancel("r-1").await.unwrap_err();
    assert!(matches!(err, Error::Api { status: Some(409), .. }), "got {err:?}");
}

#[tokio::test]
async fn test_error_malformed_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rides/r-1/status"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let err = client.get_status("r-1").await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert!(body.contains("bad gateway")),
        other => panic!("expected deserialization error, got {other:?}"),
    }
}
