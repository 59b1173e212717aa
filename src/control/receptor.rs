use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::lrp::{DesiredLrp, DesiredLrpUpdate};
use super::{BackendHandle, WorkloadControl};
use crate::error::ControlError;
use crate::verify::poll::{poll_until, PollError, PollPolicy, Step};

pub const DEFAULT_RECEPTOR_ADDRESS: &str = "http://receptor.bosh-lite.com";

/// State reported for a running instance.
pub const STATE_RUNNING: &str = "RUNNING";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrp {
    pub process_guid: String,
    pub index: i32,
    pub state: String,
}

/// JSON client for the receptor's LRP endpoints.
pub struct ReceptorClient {
    http: reqwest::Client,
    base_url: String,
    poll_policy: PollPolicy,
}

impl ReceptorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_policy: PollPolicy::fixed(Duration::from_secs(1)),
        }
    }

    /// Pacing used by [`WorkloadControl::wait_running`].
    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub async fn desire_lrp(&self, lrp: &DesiredLrp) -> Result<(), ControlError> {
        let url = self.url("/v1/desired_lrps");
        let resp = self.http.post(&url).json(lrp).send().await?;
        check("POST", url, resp).await?;
        tracing::info!(process_guid = %lrp.process_guid, "desired lrp");
        Ok(())
    }

    pub async fn update_desired_lrp(
        &self,
        process_guid: &str,
        update: &DesiredLrpUpdate,
    ) -> Result<(), ControlError> {
        let url = self.url(&format!("/v1/desired_lrps/{process_guid}"));
        let resp = self.http.put(&url).json(update).send().await?;
        check("PUT", url, resp).await?;
        tracing::info!(process_guid, ?update, "updated desired lrp");
        Ok(())
    }

    pub async fn delete_desired_lrp(&self, process_guid: &str) -> Result<(), ControlError> {
        let url = self.url(&format!("/v1/desired_lrps/{process_guid}"));
        let resp = self.http.delete(&url).send().await?;
        check("DELETE", url, resp).await?;
        tracing::info!(process_guid, "deleted desired lrp");
        Ok(())
    }

    pub async fn desired_lrps(&self) -> Result<Vec<DesiredLrp>, ControlError> {
        self.get_json("/v1/desired_lrps").await
    }

    pub async fn actual_lrps(&self, process_guid: &str) -> Result<Vec<ActualLrp>, ControlError> {
        self.get_json(&format!("/v1/actual_lrps/{process_guid}"))
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControlError> {
        let url = self.url(path);
        let resp = self.http.get(&url).send().await?;
        let resp = check("GET", url, resp).await?;
        Ok(resp.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check(
    method: &'static str,
    url: String,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ControlError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ControlError::Status {
        method,
        url,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl WorkloadControl for ReceptorClient {
    async fn create_backend(
        &self,
        identity: &str,
        listen_port: u16,
    ) -> Result<BackendHandle, ControlError> {
        let process_guid = uuid::Uuid::new_v4().to_string();
        let lrp = DesiredLrp::tcp_receiver(&process_guid, &[listen_port], &[], identity, 1)?;
        self.desire_lrp(&lrp).await?;
        Ok(BackendHandle {
            id: process_guid,
            identity: identity.to_string(),
            listen_port,
        })
    }

    async fn delete_backend(&self, handle: &BackendHandle) -> Result<(), ControlError> {
        self.delete_desired_lrp(&handle.id).await
    }

    async fn wait_running(
        &self,
        handle: &BackendHandle,
        budget: Duration,
    ) -> Result<bool, ControlError> {
        let guid = handle.id.as_str();
        let res: Result<((), _), PollError<ControlError>> =
            poll_until(&self.poll_policy, budget, |p| async move {
                match self.actual_lrps(guid).await {
                    Ok(actuals) if actuals.iter().any(|a| a.state == STATE_RUNNING) => {
                        Step::Done(())
                    }
                    Ok(actuals) => {
                        let states: Vec<&str> = actuals.iter().map(|a| a.state.as_str()).collect();
                        tracing::debug!(process_guid = guid, attempt = p.attempts, ?states, "not running yet");
                        Step::Retry(Some(format!("{states:?}")))
                    }
                    Err(ControlError::Status { status: 404, .. }) => {
                        Step::Retry(Some("no actual lrps".into()))
                    }
                    Err(e) => Step::Fail(e),
                }
            })
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(PollError::TimedOut { .. }) => Ok(false),
            Err(PollError::Failed { error, .. }) => Err(error),
        }
    }
}
