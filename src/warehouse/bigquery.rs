// src/warehouse/bigquery.rs

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use object_store::{gcp::GcpCredentialProvider, CredentialProvider};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{LoadJob, Warehouse, WriteDisposition};

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Where request bearer tokens come from.
enum Auth {
    /// A fixed OAuth access token, e.g. from `gcloud auth print-access-token`.
    Token(String),
    /// Service-account or application-default credentials, refreshed as needed.
    Gcp(GcpCredentialProvider),
}

/// BigQuery load jobs over the REST API.
pub struct BigQuery {
    client: Client,
    project: String,
    auth: Auth,
    base_url: String,
    poll_interval: Duration,
}

impl BigQuery {
    /// Authenticate every request with a fixed access token.
    pub fn new(project: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_auth(project, Auth::Token(token.into()))
    }

    /// Mint access tokens from Google credentials, such as the ones the
    /// lake's bucket was opened with.
    pub fn with_credentials(project: impl Into<String>, credentials: GcpCredentialProvider) -> Self {
        Self::with_auth(project, Auth::Gcp(credentials))
    }

    fn with_auth(project: impl Into<String>, auth: Auth) -> Self {
        Self {
            client: Client::new(),
            project: project.into(),
            auth,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn insert_body(&self, job_id: &str, job: &LoadJob) -> Value {
        json!({
            "jobReference": {
                "projectId": self.project,
                "jobId": job_id,
            },
            "configuration": {
                "load": {
                    "sourceUris": job.source_uris,
                    "sourceFormat": "PARQUET",
                    "writeDisposition": disposition_name(job.disposition),
                    "destinationTable": {
                        "projectId": self.project,
                        "datasetId": job.table.dataset,
                        "tableId": job.table.table,
                    },
                },
            },
        })
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = match &self.auth {
            Auth::Token(token) => token.clone(),
            Auth::Gcp(credentials) => credentials
                .get_credential()
                .await
                .context("fetching Google access token")?
                .bearer
                .clone(),
        };
        Ok(request.bearer_auth(token))
    }

    async fn poll(&self, reference: &JobReference) -> Result<JobResource> {
        let url = format!(
            "{}/projects/{}/jobs/{}",
            self.base_url, self.project, reference.job_id
        );
        let mut request = self.authorize(self.client.get(&url)).await?;
        if let Some(location) = &reference.location {
            request = request.query(&[("location", location)]);
        }

        request
            .send()
            .await
            .with_context(|| format!("polling load job {}", reference.job_id))?
            .error_for_status()
            .with_context(|| format!("polling load job {}", reference.job_id))?
            .json()
            .await
            .context("decoding job resource")
    }
}

#[async_trait]
impl Warehouse for BigQuery {
    #[instrument(level = "info", skip(self, job), fields(table = %job.table, files = job.source_uris.len()))]
    async fn load_parquet(&self, job: &LoadJob) -> Result<()> {
        let job_id = format!(
            "enem_lake_{}_{}",
            job.table.table,
            Utc::now().timestamp_micros()
        );
        let url = format!("{}/projects/{}/jobs", self.base_url, self.project);

        let mut resource: JobResource = self
            .authorize(self.client.post(&url))
            .await?
            .json(&self.insert_body(&job_id, job))
            .send()
            .await
            .with_context(|| format!("submitting load job for {}", job.table))?
            .error_for_status()
            .with_context(|| format!("submitting load job for {}", job.table))?
            .json()
            .await
            .context("decoding job resource")?;
        info!(job_id = %resource.job_reference.job_id, "load job submitted");

        while !resource.status.is_done() {
            debug!(state = %resource.status.state, "waiting for load job");
            tokio::time::sleep(self.poll_interval).await;
            resource = self.poll(&resource.job_reference).await?;
        }

        resource
            .status
            .into_result()
            .with_context(|| format!("loading {}", job.table))?;
        info!("load job finished");
        Ok(())
    }
}

fn disposition_name(disposition: WriteDisposition) -> &'static str {
    match disposition {
        WriteDisposition::Append => "WRITE_APPEND",
        WriteDisposition::Truncate => "WRITE_TRUNCATE",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

impl std::fmt::Display for ErrorProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.reason.as_deref().unwrap_or("error"),
            self.message.as_deref().unwrap_or("no message")
        )
    }
}

impl JobStatus {
    fn is_done(&self) -> bool {
        self.state == "DONE"
    }

    fn into_result(self) -> Result<()> {
        let Some(fatal) = self.error_result else {
            return Ok(());
        };
        if self.errors.is_empty() {
            bail!("load job failed: {}", fatal);
        }
        let details: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        Err(anyhow!("load job failed: {} ({})", fatal, details.join("; ")))
    }
}
