//! Saving a draft: the prévia first, then the deferred attachment uploads.

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::draft::{DraftAttachment, FormDraft};
use crate::api::cached_client::{PreviasService, SaveOutcome};
use crate::api::types::{Attachment, AttachmentUpload, PreviaInput, PreviaRecord};
use crate::error::{SaveError, ValidationError};

/// Uploads in flight at once after a save.
const UPLOAD_CONCURRENCY: usize = 3;

/// Everything needed to save a draft, detached from the draft itself.
#[derive(Debug, Clone)]
pub struct SubmitPlan {
  pub previa_id: Option<u64>,
  pub input: PreviaInput,
  pub uploads: Vec<PendingFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingFile {
  pub path: PathBuf,
  pub name: String,
  pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct UploadFailure {
  pub path: PathBuf,
  pub name: String,
  pub error: String,
}

#[derive(Debug, Clone)]
pub struct SaveReport {
  pub record: PreviaRecord,
  pub uploaded: Vec<(PathBuf, Attachment)>,
  pub failed: Vec<UploadFailure>,
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
  Saved(SaveReport),
  AlreadyPending,
}

impl FormDraft {
  /// Commit pending edits and validate. The draft is left intact on error.
  pub fn prepare(&mut self, now_ms: i64) -> Result<SubmitPlan, ValidationError> {
    self.pareceres.flush(now_ms);
    let input = self.to_input()?;
    let uploads = self
      .attachments
      .iter()
      .filter_map(|a| match a {
        DraftAttachment::Pending {
          path,
          name,
          mime_type,
          ..
        } => Some(PendingFile {
          path: path.clone(),
          name: name.clone(),
          mime_type: mime_type.clone(),
        }),
        DraftAttachment::Stored(_) => None,
      })
      .collect();

    Ok(SubmitPlan {
      previa_id: self.previa_id,
      input,
      uploads,
    })
  }

  /// Adopt the server's id and promote uploaded attachments.
  ///
  /// Returns `false` (and changes nothing) if the report belongs to another
  /// record than the one being edited.
  pub fn apply_report(&mut self, report: &SaveReport) -> bool {
    let same_patient = report.record.patient_id == self.patient_id;
    let same_record = self.previa_id.map_or(true, |id| id == report.record.id);
    if !(same_patient && same_record) {
      return false;
    }

    self.previa_id = Some(report.record.id);
    for attachment in self.attachments.iter_mut() {
      let DraftAttachment::Pending { path, .. } = attachment else {
        continue;
      };
      if let Some((_, stored)) = report.uploaded.iter().find(|(p, _)| *p == *path) {
        *attachment = DraftAttachment::Stored(stored.clone());
      }
    }
    true
  }
}

/// Save the prévia, then upload its pending files, a few at a time.
///
/// A failed upload does not undo the save; it is reported so the file stays
/// pending in the draft and the next save retries it.
pub async fn submit(
  service: &PreviasService,
  plan: SubmitPlan,
) -> Result<SubmitOutcome, SaveError> {
  let record = match service.save_previa(plan.previa_id, &plan.input).await? {
    SaveOutcome::Saved(record) => record,
    SaveOutcome::AlreadyPending => return Ok(SubmitOutcome::AlreadyPending),
  };

  let previa_id = record.id;
  let results: Vec<(PendingFile, Result<Attachment, String>)> = stream::iter(plan.uploads)
    .map(|file| {
      let service = service.clone();
      async move {
        let result = upload_file(&service, previa_id, &file).await;
        (file, result)
      }
    })
    .buffered(UPLOAD_CONCURRENCY)
    .collect()
    .await;

  let mut uploaded = Vec::new();
  let mut failed = Vec::new();
  for (file, result) in results {
    match result {
      Ok(attachment) => uploaded.push((file.path, attachment)),
      Err(error) => {
        warn!(name = %file.name, error = %error, "attachment upload failed");
        failed.push(UploadFailure {
          path: file.path,
          name: file.name,
          error,
        });
      }
    }
  }

  info!(
    previa_id = record.id,
    uploaded = uploaded.len(),
    failed = failed.len(),
    "draft submitted"
  );
  Ok(SubmitOutcome::Saved(SaveReport {
    record,
    uploaded,
    failed,
  }))
}

async fn upload_file(
  service: &PreviasService,
  previa_id: u64,
  file: &PendingFile,
) -> Result<Attachment, String> {
  let bytes = tokio::fs::read(&file.path)
    .await
    .map_err(|e| format!("falha ao ler {}: {}", file.path.display(), e))?;
  let upload = AttachmentUpload {
    name: file.name.clone(),
    mime_type: file.mime_type.clone(),
    bytes,
  };
  service
    .upload_attachment(previa_id, &upload)
    .await
    .map_err(|e| e.to_string())
}

/// Describe a local file as a pending attachment.
pub async fn pending_attachment(path: &Path) -> std::io::Result<DraftAttachment> {
  let metadata = tokio::fs::metadata(path).await?;
  if !metadata.is_file() {
    return Err(std::io::Error::new(
      std::io::ErrorKind::InvalidInput,
      format!("{} não é um arquivo", path.display()),
    ));
  }
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "anexo".to_string());

  Ok(DraftAttachment::Pending {
    path: path.to_path_buf(),
    mime_type: guess_mime(&name).to_string(),
    name,
    size: metadata.len(),
  })
}

pub fn guess_mime(name: &str) -> &'static str {
  let ext = name
    .rsplit_once('.')
    .map(|(_, ext)| ext.to_lowercase())
    .unwrap_or_default();
  match ext.as_str() {
    "pdf" => "application/pdf",
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "txt" => "text/plain",
    "doc" => "application/msword",
    "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "xls" => "application/vnd.ms-excel",
    "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    _ => "application/octet-stream",
  }
}
