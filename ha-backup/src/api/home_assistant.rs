//! Home Assistant REST client.

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{Entity, EntityCatalog, ManagementApi};
use crate::config::ApiConfig;
use crate::utils::errors::{BackupError, Result};

const API_RUNNING: &str = "API running.";

#[derive(Debug, Deserialize)]
struct ApiStatus {
    message: String,
}

pub struct HomeAssistantClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HomeAssistantClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BackupError::Connectivity(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&self.token)
    }
}

impl ManagementApi for HomeAssistantClient {
    fn check_liveness(&self) -> Result<bool> {
        let resp = self.get("/").send().map_err(|e| {
            BackupError::Connectivity(format!("{} unreachable: {e}", self.base_url))
        })?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackupError::Connectivity(
                "access token was rejected (401 Unauthorized)".into(),
            ));
        }
        if !resp.status().is_success() {
            warn!("Liveness check returned HTTP {}", resp.status());
            return Ok(false);
        }

        let status: ApiStatus = resp.json()?;
        debug!(message = %status.message, "Liveness check");
        Ok(status.message == API_RUNNING)
    }

    fn invoke_action(&self, domain: &str, action: &str) -> Result<()> {
        let path = format!("services/{domain}/{action}");
        match self.post(&path).json(&json!({})).send() {
            Ok(resp) => ensure_success(resp, &path).map(|_| ()),
            // The service may hold the request open until it finishes; the
            // completion poller detects the result on the filesystem instead.
            Err(e) if e.is_timeout() => {
                warn!("{domain}.{action} did not answer in time, assuming it is running");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_entities(&self) -> Result<EntityCatalog> {
        let resp = ensure_success(self.get("states").send()?, "states")?;
        let entities: Vec<Entity> = resp.json()?;
        Ok(EntityCatalog::from_entities(entities))
    }

    fn update_entity(&self, entity: &Entity) -> Result<()> {
        let path = format!("states/{}", entity.entity_id);
        let body = json!({
            "state": entity.state,
            "attributes": entity.attributes,
        });
        ensure_success(self.post(&path).json(&body).send()?, &path)?;
        Ok(())
    }
}

fn ensure_success(resp: Response, path: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(BackupError::Api(format!(
        "/api/{path} returned HTTP {status}: {}",
        body.trim()
    )))
}
