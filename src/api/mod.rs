//! Remote API access: typed client, caching gateway and domain types.

pub mod api_types;
pub mod cached_client;
pub mod client;
#[cfg(test)]
pub mod fake;
pub mod types;

use async_trait::async_trait;

use crate::error::NetworkError;
use types::{
  Attachment, AttachmentUpload, CycleEntry, Patient, PreviaInput, PreviaRecord, Protocol,
};

/// Operations offered by the remote PHP API.
///
/// `ApiClient` talks HTTP; tests substitute an in-memory fake.
#[async_trait]
pub trait PreviasApi: Send + Sync {
  async fn list_patients(&self, search: &str) -> Result<Vec<Patient>, NetworkError>;

  async fn list_protocols(&self) -> Result<Vec<Protocol>, NetworkError>;

  async fn list_previas(&self, patient_id: u64) -> Result<Vec<PreviaRecord>, NetworkError>;

  async fn get_previa(&self, previa_id: u64) -> Result<PreviaRecord, NetworkError>;

  async fn list_cycles(&self, previa_id: u64) -> Result<Vec<CycleEntry>, NetworkError>;

  async fn list_attachments(&self, previa_id: u64) -> Result<Vec<Attachment>, NetworkError>;

  async fn create_previa(&self, input: &PreviaInput) -> Result<PreviaRecord, NetworkError>;

  async fn update_previa(
    &self,
    previa_id: u64,
    input: &PreviaInput,
  ) -> Result<PreviaRecord, NetworkError>;

  async fn upload_attachment(
    &self,
    previa_id: u64,
    upload: &AttachmentUpload,
  ) -> Result<Attachment, NetworkError>;

  async fn delete_attachment(&self, attachment_id: u64) -> Result<(), NetworkError>;
}
