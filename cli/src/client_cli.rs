use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid request: {}", .0.join(" "))]
    Invalid(Vec<String>),
    #[error("could not reach the gateway: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway answered {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

pub struct ClientCli {
    http: Client,
    base_url: String,
}

impl ClientCli {
    pub fn connect(server: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: server.trim_end_matches('/').to_string(),
        }
    }

    pub async fn preprocess(
        &self,
        request: &wire::PreprocessRequest,
    ) -> Result<wire::PreprocessResponse, ClientError> {
        request.validate().map_err(ClientError::Invalid)?;
        self.post("preprocess", request).await
    }

    pub async fn generate(
        &self,
        request: &wire::GenerateRequest,
    ) -> Result<wire::GenerateResponse, ClientError> {
        request.validate().map_err(ClientError::Invalid)?;
        self.post("generate", request).await
    }

    pub async fn health(&self) -> Result<wire::HealthResponse, ClientError> {
        let response = self.http.get(self.url("health")).send().await?;
        decode(response).await
    }

    /// Jobs are synchronous on the gateway, so this waits for the whole job.
    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let text = response.text().await?;
    let detail = match serde_json::from_str::<wire::ErrorResponse>(&text) {
        Ok(body) => body.detail,
        Err(_) => text,
    };
    Err(ClientError::Rejected {
        status: status.as_u16(),
        detail,
    })
}
