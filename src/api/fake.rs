//! In-memory `PreviasApi` used by tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::types::{
  Attachment, AttachmentUpload, CycleEntry, Patient, PreviaInput, PreviaRecord, Protocol,
};
use super::PreviasApi;
use crate::error::NetworkError;

#[derive(Default)]
struct FakeState {
  previas: Vec<PreviaRecord>,
  attachments: Vec<Attachment>,
  patients: Vec<Patient>,
  calls: HashMap<&'static str, usize>,
}

/// Fake server with per-operation call counters.
#[derive(Default)]
pub struct FakeApi {
  state: Mutex<FakeState>,
  next_id: AtomicU64,
  fail_writes: AtomicBool,
  fail_reads: AtomicBool,
  write_delay: Mutex<Option<Duration>>,
}

impl FakeApi {
  pub fn new() -> Self {
    Self {
      next_id: AtomicU64::new(100),
      ..Default::default()
    }
  }

  pub fn with_patient(self, id: u64, name: &str) -> Self {
    self.state.lock().unwrap().patients.push(Patient {
      id,
      name: name.to_string(),
      document: None,
      birth_date: None,
      insurer: None,
    });
    self
  }

  pub fn calls(&self, op: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .calls
      .get(op)
      .copied()
      .unwrap_or(0)
  }

  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  pub fn set_fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  pub fn set_write_delay(&self, delay: Duration) {
    *self.write_delay.lock().unwrap() = Some(delay);
  }

  pub fn previa_count(&self) -> usize {
    self.state.lock().unwrap().previas.len()
  }

  fn record(&self, op: &'static str) {
    *self.state.lock().unwrap().calls.entry(op).or_insert(0) += 1;
  }

  fn check_read(&self) -> Result<(), NetworkError> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(NetworkError::Transport("connection refused".to_string()));
    }
    Ok(())
  }

  async fn check_write(&self) -> Result<(), NetworkError> {
    let delay = *self.write_delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(NetworkError::Status {
        status: 500,
        message: "erro interno".to_string(),
      });
    }
    Ok(())
  }

  fn build(&self, id: u64, input: &PreviaInput) -> PreviaRecord {
    PreviaRecord {
      id,
      patient_id: input.patient_id,
      guia: input.guia.clone(),
      protocol: input.protocol.clone(),
      cid: input.cid.clone(),
      clinic: input.clinic.clone(),
      planned_cycles: input.planned_cycles,
      emission_date: input.emission_date,
      forwarding_date: input.forwarding_date,
      request_date: input.request_date,
      weight_kg: input.weight_kg,
      height_cm: input.height_cm,
      pareceres: input.pareceres.clone(),
    }
  }
}

#[async_trait]
impl PreviasApi for FakeApi {
  async fn list_patients(&self, search: &str) -> Result<Vec<Patient>, NetworkError> {
    self.record("list_patients");
    self.check_read()?;
    let search = search.to_lowercase();
    Ok(
      self
        .state
        .lock()
        .unwrap()
        .patients
        .iter()
        .filter(|p| p.name.to_lowercase().contains(&search))
        .cloned()
        .collect(),
    )
  }

  async fn list_protocols(&self) -> Result<Vec<Protocol>, NetworkError> {
    self.record("list_protocols");
    self.check_read()?;
    Ok(Vec::new())
  }

  async fn list_previas(&self, patient_id: u64) -> Result<Vec<PreviaRecord>, NetworkError> {
    self.record("list_previas");
    self.check_read()?;
    Ok(
      self
        .state
        .lock()
        .unwrap()
        .previas
        .iter()
        .filter(|p| p.patient_id == patient_id)
        .cloned()
        .collect(),
    )
  }

  async fn get_previa(&self, previa_id: u64) -> Result<PreviaRecord, NetworkError> {
    self.record("get_previa");
    self.check_read()?;
    self
      .state
      .lock()
      .unwrap()
      .previas
      .iter()
      .find(|p| p.id == previa_id)
      .cloned()
      .ok_or(NetworkError::Status {
        status: 404,
        message: "prévia não encontrada".to_string(),
      })
  }

  async fn list_cycles(&self, _previa_id: u64) -> Result<Vec<CycleEntry>, NetworkError> {
    self.record("list_cycles");
    self.check_read()?;
    Ok(Vec::new())
  }

  async fn list_attachments(&self, previa_id: u64) -> Result<Vec<Attachment>, NetworkError> {
    self.record("list_attachments");
    self.check_read()?;
    Ok(
      self
        .state
        .lock()
        .unwrap()
        .attachments
        .iter()
        .filter(|a| a.previa_id == previa_id)
        .cloned()
        .collect(),
    )
  }

  async fn create_previa(&self, input: &PreviaInput) -> Result<PreviaRecord, NetworkError> {
    self.record("create_previa");
    self.check_write().await?;
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let record = self.build(id, input);
    self.state.lock().unwrap().previas.push(record.clone());
    Ok(record)
  }

  async fn update_previa(
    &self,
    previa_id: u64,
    input: &PreviaInput,
  ) -> Result<PreviaRecord, NetworkError> {
    self.record("update_previa");
    self.check_write().await?;
    let record = self.build(previa_id, input);
    let mut state = self.state.lock().unwrap();
    match state.previas.iter_mut().find(|p| p.id == previa_id) {
      Some(existing) => *existing = record.clone(),
      None => {
        return Err(NetworkError::Status {
          status: 404,
          message: "prévia não encontrada".to_string(),
        })
      }
    }
    Ok(record)
  }

  async fn upload_attachment(
    &self,
    previa_id: u64,
    upload: &AttachmentUpload,
  ) -> Result<Attachment, NetworkError> {
    self.record("upload_attachment");
    self.check_write().await?;
    let attachment = Attachment {
      id: self.next_id.fetch_add(1, Ordering::SeqCst),
      previa_id,
      name: upload.name.clone(),
      size: upload.bytes.len() as u64,
      mime_type: upload.mime_type.clone(),
      url: Some(format!("/anexos/{}", upload.name)),
    };
    self
      .state
      .lock()
      .unwrap()
      .attachments
      .push(attachment.clone());
    Ok(attachment)
  }

  async fn delete_attachment(&self, attachment_id: u64) -> Result<(), NetworkError> {
    self.record("delete_attachment");
    self.check_write().await?;
    self
      .state
      .lock()
      .unwrap()
      .attachments
      .retain(|a| a.id != attachment_id);
    Ok(())
  }
}
