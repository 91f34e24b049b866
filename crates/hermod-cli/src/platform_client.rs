//! HTTP `PlatformClient` (spec §4.5 step 1): the concrete counterpart to
//! `hermod_supervisor::PlatformClient`, which the supervisor crate leaves
//! unimplemented since the administrative API server it talks to is out of
//! scope. This binary is the composition root, so it owns the wiring.

use async_trait::async_trait;
use hermod_supervisor::{PlatformClient, ResourceHints, WorkerWeight, Workflow};
use serde::Deserialize;

pub struct HttpPlatformClient {
    base_url: String,
    worker_guid: String,
    client: reqwest::Client,
}

impl HttpPlatformClient {
    pub fn new(base_url: impl Into<String>, worker_guid: impl Into<String>, worker_token: &str) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {worker_token}"))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            worker_guid: worker_guid.into(),
            client,
        })
    }
}

#[derive(Deserialize)]
struct WorkflowDto {
    id: String,
    cpu_weight: Option<f64>,
    mem_weight: Option<f64>,
    owner_worker: Option<String>,
}

#[derive(Deserialize)]
struct WorkerWeightDto {
    worker_id: String,
    weight: f64,
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn fetch_desired_workflows(&self) -> anyhow::Result<Vec<Workflow>> {
        let url = format!("{}/api/workers/{}/workflows", self.base_url, self.worker_guid);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let dtos: Vec<WorkflowDto> = response.json().await?;
        Ok(dtos
            .into_iter()
            .map(|dto| Workflow {
                id: dto.id,
                resource_hints: match (dto.cpu_weight, dto.mem_weight) {
                    (Some(cpu_weight), Some(mem_weight)) => Some(ResourceHints { cpu_weight, mem_weight }),
                    _ => None,
                },
                owner_worker: dto.owner_worker,
            })
            .collect())
    }

    async fn fetch_worker_weights(&self) -> anyhow::Result<Vec<WorkerWeight>> {
        let url = format!("{}/api/workers/weights", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let dtos: Vec<WorkerWeightDto> = response.json().await?;
        Ok(dtos
            .into_iter()
            .map(|dto| WorkerWeight {
                worker_id: dto.worker_id,
                weight: dto.weight,
            })
            .collect())
    }
}

/// PUTs this worker's own record to the platform before the first reconcile
/// tick, so a worker started with a GUID the platform hasn't seen yet still
/// becomes a valid placement candidate.
pub async fn register_worker(
    client: &reqwest::Client,
    base_url: &str,
    worker_guid: &str,
    worker_token: &str,
    host: &str,
    port: u16,
    reg_token: Option<&str>,
) -> anyhow::Result<()> {
    let url = format!("{}/api/workers/{worker_guid}", base_url.trim_end_matches('/'));
    let mut request = client
        .put(&url)
        .bearer_auth(worker_token)
        .json(&serde_json::json!({ "host": host, "port": port }));
    if let Some(reg_token) = reg_token {
        request = request.header("X-Hermod-Worker-Reg-Token", reg_token);
    }
    request.send().await?.error_for_status()?;
    Ok(())
}
