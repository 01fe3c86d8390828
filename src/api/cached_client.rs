//! Caching gateway over `PreviasApi`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::types::{
  Attachment, AttachmentUpload, CycleEntry, Patient, PreviaInput, PreviaRecord, Protocol,
};
use super::PreviasApi;
use crate::cache::{CacheKey, CacheResult, CacheService};
use crate::error::{NetworkError, SaveError};

/// Identifies the record a save targets, for mutual exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveSlot {
  /// A prévia not yet created, per patient
  New { patient_id: u64 },
  Existing(u64),
}

impl SaveSlot {
  pub fn for_record(previa_id: Option<u64>, patient_id: u64) -> Self {
    match previa_id {
      Some(id) => SaveSlot::Existing(id),
      None => SaveSlot::New { patient_id },
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
  Saved(PreviaRecord),
  /// Another save for the same record was still in flight; nothing was sent
  AlreadyPending,
}

/// Releases its slot on drop, whatever way the save ends.
struct SaveGuard {
  slots: Arc<Mutex<HashSet<SaveSlot>>>,
  slot: SaveSlot,
}

impl Drop for SaveGuard {
  fn drop(&mut self) {
    if let Ok(mut slots) = self.slots.lock() {
      slots.remove(&self.slot);
    }
  }
}

/// API client with transparent caching and write invalidation.
///
/// Reads consult the cache first; writes go to the server first and only
/// invalidate cache entries once the server has accepted them.
#[derive(Clone)]
pub struct PreviasService {
  api: Arc<dyn PreviasApi>,
  cache: CacheService,
  saving: Arc<Mutex<HashSet<SaveSlot>>>,
}

impl PreviasService {
  pub fn new(api: Arc<dyn PreviasApi>, cache: CacheService) -> Self {
    Self {
      api,
      cache,
      saving: Arc::new(Mutex::new(HashSet::new())),
    }
  }

  pub fn cache(&self) -> &CacheService {
    &self.cache
  }

  pub async fn list_patients(
    &self,
    search: &str,
  ) -> Result<CacheResult<Vec<Patient>>, NetworkError> {
    let key = CacheKey::patients(search);
    let api = self.api.clone();
    let search = search.to_string();
    self
      .cache
      .fetch(&key, move || async move { api.list_patients(&search).await })
      .await
  }

  pub async fn list_protocols(&self) -> Result<CacheResult<Vec<Protocol>>, NetworkError> {
    let api = self.api.clone();
    self
      .cache
      .fetch(&CacheKey::Protocols, move || async move {
        api.list_protocols().await
      })
      .await
  }

  /// Consultation history of a patient.
  pub async fn list_previas(
    &self,
    patient_id: u64,
  ) -> Result<CacheResult<Vec<PreviaRecord>>, NetworkError> {
    let api = self.api.clone();
    self
      .cache
      .fetch(&CacheKey::PreviasByPatient(patient_id), move || async move {
        api.list_previas(patient_id).await
      })
      .await
  }

  pub async fn get_previa(
    &self,
    previa_id: u64,
  ) -> Result<CacheResult<PreviaRecord>, NetworkError> {
    let api = self.api.clone();
    self
      .cache
      .fetch(&CacheKey::Previa(previa_id), move || async move {
        api.get_previa(previa_id).await
      })
      .await
  }

  pub async fn list_cycles(
    &self,
    previa_id: u64,
  ) -> Result<CacheResult<Vec<CycleEntry>>, NetworkError> {
    let api = self.api.clone();
    self
      .cache
      .fetch(&CacheKey::PreviaCycles(previa_id), move || async move {
        api.list_cycles(previa_id).await
      })
      .await
  }

  pub async fn list_attachments(
    &self,
    previa_id: u64,
  ) -> Result<CacheResult<Vec<Attachment>>, NetworkError> {
    let api = self.api.clone();
    self
      .cache
      .fetch(&CacheKey::PreviaAttachments(previa_id), move || async move {
        api.list_attachments(previa_id).await
      })
      .await
  }

  /// Whether a save for `slot` is currently in flight.
  pub fn is_saving(&self, slot: SaveSlot) -> bool {
    self
      .saving
      .lock()
      .map(|slots| slots.contains(&slot))
      .unwrap_or(false)
  }

  fn claim(&self, slot: SaveSlot) -> Option<SaveGuard> {
    let mut slots = self.saving.lock().ok()?;
    if !slots.insert(slot) {
      return None;
    }
    Some(SaveGuard {
      slots: self.saving.clone(),
      slot,
    })
  }

  /// Create (`previa_id == None`) or update a prévia.
  ///
  /// Only one save per record may be in flight; a concurrent request is
  /// ignored and reported as `AlreadyPending`. On success the patient's list
  /// and the record's detail are invalidated, the write is recorded and the
  /// list is refreshed in the background. On failure the cache is untouched.
  pub async fn save_previa(
    &self,
    previa_id: Option<u64>,
    input: &PreviaInput,
  ) -> Result<SaveOutcome, SaveError> {
    input.validate()?;

    let slot = SaveSlot::for_record(previa_id, input.patient_id);
    let Some(_guard) = self.claim(slot) else {
      info!(?slot, "save already in flight, ignoring");
      return Ok(SaveOutcome::AlreadyPending);
    };

    let record = match previa_id {
      Some(id) => self.api.update_previa(id, input).await?,
      None => self.api.create_previa(input).await?,
    };
    info!(previa_id = record.id, patient_id = record.patient_id, "prévia saved");

    self.cache.remove(&CacheKey::PreviasByPatient(record.patient_id));
    self.cache.remove(&CacheKey::Previa(record.id));
    self.cache.record_write();
    self.refresh_patient_list(record.patient_id);

    Ok(SaveOutcome::Saved(record))
  }

  fn refresh_patient_list(&self, patient_id: u64) {
    let api = self.api.clone();
    debug!(patient_id, "scheduling history refresh");
    self.cache.refresh_in_background(
      CacheKey::PreviasByPatient(patient_id),
      async move { api.list_previas(patient_id).await },
    );
  }

  pub async fn upload_attachment(
    &self,
    previa_id: u64,
    upload: &AttachmentUpload,
  ) -> Result<Attachment, NetworkError> {
    let attachment = self.api.upload_attachment(previa_id, upload).await?;
    info!(previa_id, attachment_id = attachment.id, "attachment uploaded");

    self.cache.remove(&CacheKey::PreviaAttachments(previa_id));
    self.cache.record_write();
    Ok(attachment)
  }

  pub async fn delete_attachment(
    &self,
    previa_id: u64,
    attachment_id: u64,
  ) -> Result<(), NetworkError> {
    self.api.delete_attachment(attachment_id).await?;
    info!(previa_id, attachment_id, "attachment deleted");

    self.cache.remove(&CacheKey::PreviaAttachments(previa_id));
    self.cache.record_write();
    Ok(())
  }
}
