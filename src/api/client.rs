use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::api_types::{
  parse_body, ApiAttachment, ApiCycle, ApiPatient, ApiPrevia, ApiPreviaPayload, ApiProtocol,
};
use super::types::{
  Attachment, AttachmentUpload, CycleEntry, Patient, PreviaInput, PreviaRecord, Protocol,
};
use super::PreviasApi;
use crate::config::Config;
use crate::error::NetworkError;

/// HTTP client for the prévias API
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base = base_url(&config.api.url)?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      token: Config::get_api_token(),
    })
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, NetworkError> {
    let url = self
      .base
      .join(path)
      .map_err(|e| NetworkError::Transport(format!("invalid endpoint {}: {}", path, e)))?;

    let builder = self
      .http
      .request(method, url)
      .header(reqwest::header::ACCEPT, "application/json");

    Ok(match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    })
  }

  async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, NetworkError> {
    let response = builder.send().await?;
    let body = read_json(response).await?;
    parse_body(body)
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
    tracing::debug!(path, "GET");
    self.send(self.request(Method::GET, path)?).await
  }
}

/// Normalize the configured base so relative endpoint joins keep its path.
fn base_url(raw: &str) -> Result<Url> {
  let with_slash = if raw.ends_with('/') {
    raw.to_string()
  } else {
    format!("{}/", raw)
  };
  Url::parse(&with_slash).map_err(|e| eyre!("Invalid API url '{}': {}", raw, e))
}

/// Fail on non-2xx, otherwise decode the body (an empty body reads as null).
async fn read_json(response: Response) -> Result<Value, NetworkError> {
  let status = response.status();
  let text = response.text().await?;

  if !status.is_success() {
    let message = serde_json::from_str::<Value>(&text)
      .ok()
      .and_then(|v| {
        v.get("message")
          .or_else(|| v.get("erro"))
          .and_then(Value::as_str)
          .map(String::from)
      })
      .unwrap_or_else(|| text.trim().chars().take(200).collect());
    return Err(NetworkError::Status {
      status: status.as_u16(),
      message,
    });
  }

  if text.trim().is_empty() {
    return Ok(Value::Null);
  }
  Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl PreviasApi for ApiClient {
  async fn list_patients(&self, search: &str) -> Result<Vec<Patient>, NetworkError> {
    let mut builder = self.request(Method::GET, "pacientes")?;
    if !search.trim().is_empty() {
      builder = builder.query(&[("busca", search.trim())]);
    }
    let patients: Vec<ApiPatient> = self.send(builder).await?;
    Ok(patients.into_iter().map(Patient::from).collect())
  }

  async fn list_protocols(&self) -> Result<Vec<Protocol>, NetworkError> {
    let protocols: Vec<ApiProtocol> = self.get("protocolos").await?;
    Ok(protocols.into_iter().map(Protocol::from).collect())
  }

  async fn list_previas(&self, patient_id: u64) -> Result<Vec<PreviaRecord>, NetworkError> {
    let builder = self
      .request(Method::GET, "previas")?
      .query(&[("paciente_id", patient_id)]);
    let previas: Vec<ApiPrevia> = self.send(builder).await?;
    Ok(previas.into_iter().map(PreviaRecord::from).collect())
  }

  async fn get_previa(&self, previa_id: u64) -> Result<PreviaRecord, NetworkError> {
    let previa: ApiPrevia = self.get(&format!("previas/{}", previa_id)).await?;
    Ok(previa.into())
  }

  async fn list_cycles(&self, previa_id: u64) -> Result<Vec<CycleEntry>, NetworkError> {
    let cycles: Vec<ApiCycle> = self.get(&format!("previas/{}/ciclos", previa_id)).await?;
    Ok(cycles.into_iter().map(CycleEntry::from).collect())
  }

  async fn list_attachments(&self, previa_id: u64) -> Result<Vec<Attachment>, NetworkError> {
    let attachments: Vec<ApiAttachment> =
      self.get(&format!("previas/{}/anexos", previa_id)).await?;
    Ok(attachments.into_iter().map(Attachment::from).collect())
  }

  async fn create_previa(&self, input: &PreviaInput) -> Result<PreviaRecord, NetworkError> {
    tracing::debug!(patient_id = input.patient_id, "POST previas");
    let builder = self
      .request(Method::POST, "previas")?
      .json(&ApiPreviaPayload::from(input));
    let previa: ApiPrevia = self.send(builder).await?;
    Ok(previa.into())
  }

  async fn update_previa(
    &self,
    previa_id: u64,
    input: &PreviaInput,
  ) -> Result<PreviaRecord, NetworkError> {
    tracing::debug!(previa_id, "PUT previas");
    let builder = self
      .request(Method::PUT, &format!("previas/{}", previa_id))?
      .json(&ApiPreviaPayload::from(input));
    let previa: ApiPrevia = self.send(builder).await?;
    Ok(previa.into())
  }

  async fn upload_attachment(
    &self,
    previa_id: u64,
    upload: &AttachmentUpload,
  ) -> Result<Attachment, NetworkError> {
    tracing::debug!(previa_id, name = %upload.name, "POST anexo");
    let part = Part::bytes(upload.bytes.clone())
      .file_name(upload.name.clone())
      .mime_str(&upload.mime_type)
      .map_err(|e| NetworkError::Transport(format!("invalid mime type: {}", e)))?;
    let form = Form::new().part("arquivo", part);

    let builder = self
      .request(Method::POST, &format!("previas/{}/anexos", previa_id))?
      .multipart(form);
    let attachment: ApiAttachment = self.send(builder).await?;
    Ok(attachment.into())
  }

  async fn delete_attachment(&self, attachment_id: u64) -> Result<(), NetworkError> {
    tracing::debug!(attachment_id, "DELETE anexo");
    let response = self
      .request(Method::DELETE, &format!("anexos/{}", attachment_id))?
      .send()
      .await?;
    read_json(response).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_base_url_keeps_path() {
    let base = base_url("https://clinica.example.com/api").unwrap();
    assert_eq!(
      base.join("previas/7").unwrap().as_str(),
      "https://clinica.example.com/api/previas/7"
    );

    let base = base_url("https://clinica.example.com/api/").unwrap();
    assert_eq!(
      base.join("pacientes").unwrap().as_str(),
      "https://clinica.example.com/api/pacientes"
    );
  }

  #[test]
  fn test_base_url_rejects_garbage() {
    assert!(base_url("not a url").is_err());
  }
}
