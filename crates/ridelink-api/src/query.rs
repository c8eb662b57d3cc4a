// Query API HTTP client
//
// Wraps `reqwest::Client` with ridelink URL construction and envelope
// unwrapping. The backend answers every call with
// `{ "success": bool, "data": ..., "error": "..." }`; callers only ever see
// the unwrapped `data` or an `Error::Api`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Envelope ─────────────────────────────────────────────────────────

/// Normalized response envelope shared by every query endpoint.
#[derive(Debug, Deserialize)]
pub struct QueryResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> QueryResponse<T> {
    /// Collapse the envelope into a `Result`.
    pub fn into_result(self, status: Option<u16>) -> Result<T, Error> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(Error::Api {
                message: "response marked successful but carried no data".into(),
                status,
            }),
            (false, _) => Err(Error::Api {
                message: self.error.unwrap_or_else(|| "unspecified backend error".into()),
                status,
            }),
        }
    }
}

// ── Wire models ──────────────────────────────────────────────────────

/// Parameters for `getNearbyAgents`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyAgentsParams {
    pub ride_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub attempt_token: u64,
    pub priority: String,
}

/// A prospective agent as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Distance from pickup in kilometres.
    pub distance: f64,
    #[serde(default)]
    pub rating: Option<f32>,
    /// Estimated arrival in seconds.
    #[serde(default)]
    pub eta: Option<u32>,
}

/// Parameters for `confirmAgent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmParams {
    pub agent_id: String,
    pub attempt_token: u64,
}

/// Backend verdict on a confirm call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmReply {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
    /// Engagement snapshot after the confirm, if the backend includes one.
    #[serde(default)]
    pub ride: Option<serde_json::Value>,
}

/// Status snapshot from `getStatus`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideStatusReply {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

// ── QueryClient ──────────────────────────────────────────────────────

/// HTTP client for the request/response half of the backend.
#[derive(Debug, Clone)]
pub struct QueryClient {
    http: reqwest::Client,
    base_url: Url,
}

impl QueryClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /rides/{id}/status`
    pub async fn get_status(&self, ride_id: &str) -> Result<RideStatusReply, Error> {
        let url = self.url(&format!("rides/{ride_id}/status"))?;
        self.get(url).await
    }

    /// `POST /rides/{id}/nearby-agents`
    pub async fn get_nearby_agents(
        &self,
        params: &NearbyAgentsParams,
    ) -> Result<Vec<AgentSummary>, Error> {
        let url = self.url(&format!("rides/{}/nearby-agents", params.ride_id))?;
        self.post(url, params).await
    }

    /// `POST /rides/{id}/confirm`
    pub async fn confirm_agent(
        &self,
        ride_id: &str,
        params: &ConfirmParams,
    ) -> Result<ConfirmReply, Error> {
        let url = self.url(&format!("rides/{ride_id}/confirm"))?;
        self.post(url, params).await
    }

    /// `POST /rides/{id}/cancel`
    pub async fn cancel(&self, ride_id: &str) -> Result<(), Error> {
        let url = self.url(&format!("rides/{ride_id}/cancel"))?;
        debug!("POST {}", url);
        let resp = self.http.post(url).json(&serde_json::json!({})).send().await?;
        let (envelope, status) = read_envelope::<serde_json::Value>(resp).await?;
        if envelope.success {
            Ok(())
        } else {
            Err(Error::Api {
                message: envelope
                    .error
                    .unwrap_or_else(|| "cancel refused".into()),
                status: Some(status),
            })
        }
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        parse_envelope(resp).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let resp = self.http.post(url).json(body).send().await?;
        parse_envelope(resp).await
    }
}

/// Parse the `{ success, data, error }` envelope and unwrap `data`.
async fn parse_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let (envelope, status) = read_envelope(resp).await?;
    envelope.into_result(Some(status))
}

async fn read_envelope<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<(QueryResponse<T>, u16), Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: format!("query API refused the token (HTTP {status})"),
        });
    }

    let body = resp.text().await?;

    let envelope: QueryResponse<T> =
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;

    Ok((envelope, status.as_u16()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn failed_envelope_surfaces_backend_message() {
        let env: QueryResponse<serde_json::Value> =
            serde_json::from_str(r#"{"success":false,"error":"ride not found"}"#).unwrap();
        let err = env.into_result(Some(404)).unwrap_err();
        assert!(matches!(err, Error::Api { ref message, status: Some(404) } if message == "ride not found"));
    }

    #[test]
    fn successful_envelope_without_data_is_an_error() {
        let env: QueryResponse<Vec<AgentSummary>> =
            serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(env.into_result(Some(200)).is_err());
    }

    fn decode<T: DeserializeOwned>(raw: &str) -> QueryResponse<T> {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn envelope_decodes_payloads_without_default() {
        let env: QueryResponse<AgentSummary> =
            decode(r#"{"success":true,"data":{"id":"d-1","distance":1.5}}"#);
        assert_eq!(env.into_result(Some(200)).unwrap().id, "d-1");

        let env: QueryResponse<AgentSummary> = decode(r#"{"success":false}"#);
        assert!(env.data.is_none());
    }

    #[test]
    fn url_join_tolerates_trailing_slash() {
        let client =
            QueryClient::from_reqwest("http://localhost:9000/api/", reqwest::Client::new())
                .unwrap();
        let url = client.url("rides/r-1/status").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/api/rides/r-1/status");
    }
}
