//! In-progress prévia owned by the form view.

use std::path::PathBuf;

use super::mask::{apply_date_mask, format_br_date, parse_br_date};
use super::parecer::{ParecerField, ParecerForm};
use crate::api::api_types::parse_decimal;
use crate::api::types::{Attachment, PreviaInput, PreviaRecord};
use crate::error::{FieldIssue, ValidationError};

/// Header fields of the prévia, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
  Clinic,
  Guia,
  Protocol,
  Cid,
  PlannedCycles,
  EmissionDate,
  ForwardingDate,
  RequestDate,
  Weight,
  Height,
}

impl HeaderField {
  pub const ALL: [HeaderField; 10] = [
    HeaderField::Clinic,
    HeaderField::Guia,
    HeaderField::Protocol,
    HeaderField::Cid,
    HeaderField::PlannedCycles,
    HeaderField::EmissionDate,
    HeaderField::ForwardingDate,
    HeaderField::RequestDate,
    HeaderField::Weight,
    HeaderField::Height,
  ];

  pub fn label(&self) -> &'static str {
    match self {
      HeaderField::Clinic => "Clínica/prestador",
      HeaderField::Guia => "Guia",
      HeaderField::Protocol => "Protocolo",
      HeaderField::Cid => "CID",
      HeaderField::PlannedCycles => "Ciclos previstos",
      HeaderField::EmissionDate => "Data emissão",
      HeaderField::ForwardingDate => "Data encaminhamento",
      HeaderField::RequestDate => "Data solicitação",
      HeaderField::Weight => "Peso (kg)",
      HeaderField::Height => "Altura (cm)",
    }
  }

  pub fn is_date(&self) -> bool {
    matches!(
      self,
      HeaderField::EmissionDate | HeaderField::ForwardingDate | HeaderField::RequestDate
    )
  }

  /// Field name used in `ValidationError` issues
  pub fn issue_key(&self) -> &'static str {
    match self {
      HeaderField::Clinic => "clinica",
      HeaderField::Guia => "guia",
      HeaderField::Protocol => "protocolo",
      HeaderField::Cid => "cid",
      HeaderField::PlannedCycles => "ciclos",
      HeaderField::EmissionDate => "emissao",
      HeaderField::ForwardingDate => "encaminhamento",
      HeaderField::RequestDate => "solicitacao",
      HeaderField::Weight => "peso",
      HeaderField::Height => "altura",
    }
  }
}

/// A file attached to the draft.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftAttachment {
  /// Picked locally; uploaded after the prévia is saved
  Pending {
    path: PathBuf,
    name: String,
    size: u64,
    mime_type: String,
  },
  Stored(Attachment),
}

impl DraftAttachment {
  pub fn name(&self) -> &str {
    match self {
      DraftAttachment::Pending { name, .. } => name,
      DraftAttachment::Stored(a) => &a.name,
    }
  }

  pub fn size(&self) -> u64 {
    match self {
      DraftAttachment::Pending { size, .. } => *size,
      DraftAttachment::Stored(a) => a.size,
    }
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, DraftAttachment::Pending { .. })
  }
}

#[derive(Debug, Clone)]
pub struct FormDraft {
  /// `None` until the server assigns an id
  pub previa_id: Option<u64>,
  pub patient_id: u64,
  pub clinic: String,
  pub guia: String,
  pub protocol: String,
  pub cid: String,
  pub planned_cycles: String,
  pub emission_date: String,
  pub forwarding_date: String,
  pub request_date: String,
  pub weight: String,
  pub height: String,
  pub pareceres: ParecerForm,
  pub attachments: Vec<DraftAttachment>,
}

impl FormDraft {
  pub fn new(patient_id: u64, clinic: Option<String>, user: Option<String>, now_ms: i64) -> Self {
    Self {
      previa_id: None,
      patient_id,
      clinic: clinic.unwrap_or_default(),
      guia: String::new(),
      protocol: String::new(),
      cid: String::new(),
      planned_cycles: String::new(),
      emission_date: String::new(),
      forwarding_date: String::new(),
      request_date: String::new(),
      weight: String::new(),
      height: String::new(),
      pareceres: ParecerForm::new(user, now_ms),
      attachments: Vec::new(),
    }
  }

  /// Draft for editing a saved prévia.
  pub fn from_record(
    record: &PreviaRecord,
    attachments: Vec<Attachment>,
    user: Option<String>,
    now_ms: i64,
  ) -> Self {
    Self {
      previa_id: Some(record.id),
      patient_id: record.patient_id,
      clinic: record.clinic.clone(),
      guia: record.guia.clone(),
      protocol: record.protocol.clone(),
      cid: record.cid.clone(),
      planned_cycles: record
        .planned_cycles
        .map(|c| c.to_string())
        .unwrap_or_default(),
      emission_date: format_br_date(record.emission_date),
      forwarding_date: format_br_date(record.forwarding_date),
      request_date: format_br_date(record.request_date),
      weight: record.weight_kg.map(format_decimal).unwrap_or_default(),
      height: record.height_cm.map(format_decimal).unwrap_or_default(),
      pareceres: ParecerForm::from_registros(&record.pareceres, user, now_ms),
      attachments: attachments.into_iter().map(DraftAttachment::Stored).collect(),
    }
  }

  pub fn is_new(&self) -> bool {
    self.previa_id.is_none()
  }

  pub fn header(&self, field: HeaderField) -> &str {
    match field {
      HeaderField::Clinic => &self.clinic,
      HeaderField::Guia => &self.guia,
      HeaderField::Protocol => &self.protocol,
      HeaderField::Cid => &self.cid,
      HeaderField::PlannedCycles => &self.planned_cycles,
      HeaderField::EmissionDate => &self.emission_date,
      HeaderField::ForwardingDate => &self.forwarding_date,
      HeaderField::RequestDate => &self.request_date,
      HeaderField::Weight => &self.weight,
      HeaderField::Height => &self.height,
    }
  }

  fn header_mut(&mut self, field: HeaderField) -> &mut String {
    match field {
      HeaderField::Clinic => &mut self.clinic,
      HeaderField::Guia => &mut self.guia,
      HeaderField::Protocol => &mut self.protocol,
      HeaderField::Cid => &mut self.cid,
      HeaderField::PlannedCycles => &mut self.planned_cycles,
      HeaderField::EmissionDate => &mut self.emission_date,
      HeaderField::ForwardingDate => &mut self.forwarding_date,
      HeaderField::RequestDate => &mut self.request_date,
      HeaderField::Weight => &mut self.weight,
      HeaderField::Height => &mut self.height,
    }
  }

  /// Set a header field from raw input. Date fields are masked; a rejected
  /// keystroke leaves the field unchanged and returns `false`.
  pub fn set_header(&mut self, field: HeaderField, raw: &str) -> bool {
    let value = if field.is_date() {
      match apply_date_mask(raw) {
        Some(masked) => masked,
        None => return false,
      }
    } else {
      raw.to_string()
    };
    *self.header_mut(field) = value;
    true
  }

  pub fn forwarding_date(&self) -> Option<chrono::NaiveDate> {
    parse_br_date(&self.forwarding_date)
  }

  pub fn weight_kg(&self) -> Option<f64> {
    parse_decimal(&self.weight)
  }

  pub fn height_cm(&self) -> Option<f64> {
    parse_decimal(&self.height)
  }

  pub fn add_attachment(&mut self, attachment: DraftAttachment) {
    self.attachments.push(attachment);
  }

  /// Drop the attachment at `index`. Returns it so stored ones can be deleted remotely.
  pub fn remove_attachment(&mut self, index: usize) -> Option<DraftAttachment> {
    (index < self.attachments.len()).then(|| self.attachments.remove(index))
  }

  /// Check the draft and build the payload to save.
  ///
  /// Collects every problem at once: required fields plus malformed dates and numbers.
  pub fn to_input(&self) -> Result<PreviaInput, ValidationError> {
    let mut issues = Vec::new();

    let emission_date = checked_date(
      &self.emission_date,
      "emissao",
      "Data de emissão inválida",
      &mut issues,
    );
    let forwarding_date = checked_date(
      &self.forwarding_date,
      "encaminhamento",
      "Data de encaminhamento inválida",
      &mut issues,
    );
    let request_date = checked_date(
      &self.request_date,
      "solicitacao",
      "Data de solicitação inválida",
      &mut issues,
    );
    let weight_kg = checked_number(&self.weight, "peso", "Peso inválido", &mut issues);
    let height_cm = checked_number(&self.height, "altura", "Altura inválida", &mut issues);

    // A half-typed parecer date would otherwise be saved as empty
    for (position, entry) in self.pareceres.entries().iter().enumerate() {
      for field in [ParecerField::RequestDate, ParecerField::OpinionDate] {
        let message = format!("Parecer {}: {} inválida", position + 1, field.label());
        checked_date(entry.value(field), &field.issue_key(entry.id), &message, &mut issues);
      }
    }

    let planned_cycles = match self.planned_cycles.trim() {
      "" => None,
      s => match s.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
          issues.push(FieldIssue::new("ciclos", "Número de ciclos inválido"));
          None
        }
      },
    };

    let input = PreviaInput {
      patient_id: self.patient_id,
      guia: self.guia.trim().to_string(),
      protocol: self.protocol.trim().to_string(),
      cid: self.cid.trim().to_uppercase(),
      clinic: self.clinic.trim().to_string(),
      planned_cycles,
      emission_date,
      forwarding_date,
      request_date,
      weight_kg,
      height_cm,
      pareceres: self.pareceres.to_registros(),
    };

    if let Err(required) = input.validate() {
      let mut all = required.issues;
      all.extend(issues);
      issues = all;
    }

    if issues.is_empty() {
      Ok(input)
    } else {
      Err(ValidationError { issues })
    }
  }
}

fn checked_date(
  value: &str,
  field: &str,
  message: &str,
  issues: &mut Vec<FieldIssue>,
) -> Option<chrono::NaiveDate> {
  if value.trim().is_empty() {
    return None;
  }
  let parsed = parse_br_date(value);
  if parsed.is_none() {
    issues.push(FieldIssue::new(field, message));
  }
  parsed
}

fn checked_number(
  value: &str,
  field: &str,
  message: &str,
  issues: &mut Vec<FieldIssue>,
) -> Option<f64> {
  if value.trim().is_empty() {
    return None;
  }
  let parsed = parse_decimal(value).filter(|v| *v > 0.0);
  if parsed.is_none() {
    issues.push(FieldIssue::new(field, message));
  }
  parsed
}

fn format_decimal(v: f64) -> String {
  if v.fract() == 0.0 {
    format!("{}", v as i64)
  } else {
    format!("{}", v).replace('.', ",")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  const NOW: i64 = 1_709_251_200_000;

  fn filled() -> FormDraft {
    let mut draft = FormDraft::new(42, Some("Clínica Central".to_string()), None, NOW);
    draft.guia = "G1".to_string();
    draft.protocol = "Protocolo A".to_string();
    draft.cid = "c509".to_string();
    draft
  }

  #[test]
  fn test_valid_draft_builds_input() {
    let mut draft = filled();
    assert!(draft.set_header(HeaderField::ForwardingDate, "20022024"));
    draft.weight = "72,5".to_string();
    draft.planned_cycles = "6".to_string();

    let input = draft.to_input().unwrap();
    assert_eq!(input.patient_id, 42);
    assert_eq!(input.cid, "C509");
    assert_eq!(input.forwarding_date, NaiveDate::from_ymd_opt(2024, 2, 20));
    assert_eq!(input.weight_kg, Some(72.5));
    assert_eq!(input.planned_cycles, Some(6));
    assert_eq!(input.pareceres.len(), 1);
  }

  #[test]
  fn test_missing_required_fields() {
    let draft = FormDraft::new(0, None, None, NOW);
    let err = draft.to_input().unwrap_err();
    for field in ["paciente", "clinica", "guia", "protocolo", "cid"] {
      assert!(err.has_field(field), "missing issue for {}", field);
    }
  }

  #[test]
  fn test_malformed_values_reported() {
    let mut draft = filled();
    draft.emission_date = "05/03/20".to_string();
    draft.height = "abc".to_string();
    draft.planned_cycles = "0".to_string();

    let err = draft.to_input().unwrap_err();
    assert!(err.has_field("emissao"));
    assert!(err.has_field("altura"));
    assert!(err.has_field("ciclos"));
    assert!(!err.has_field("guia"));
  }

  #[test]
  fn test_incomplete_parecer_date_blocks_save() {
    let mut draft = filled();
    let id = draft.pareceres.entries()[0].id;
    assert!(draft
      .pareceres
      .input(id, ParecerField::OpinionDate, "0503202", NOW)
      .unwrap());
    draft.pareceres.flush(NOW);
    assert_eq!(draft.pareceres.entries()[0].opinion_date, "05/03/202");

    let err = draft.to_input().unwrap_err();
    assert!(err.has_field(&format!("parecer_{}_data_parecer", id)));
    assert!(!err.has_field(&format!("parecer_{}_data_solicitacao", id)));
    assert_eq!(err.issues.len(), 1);

    draft
      .pareceres
      .input(id, ParecerField::OpinionDate, "05032024", NOW)
      .unwrap();
    draft.pareceres.flush(NOW);
    let input = draft.to_input().unwrap();
    assert_eq!(
      input.pareceres[0].opinion_date,
      NaiveDate::from_ymd_opt(2024, 3, 5)
    );
  }

  #[test]
  fn test_header_date_mask() {
    let mut draft = filled();
    assert!(draft.set_header(HeaderField::EmissionDate, "0103"));
    assert_eq!(draft.emission_date, "01/03");
    assert!(!draft.set_header(HeaderField::EmissionDate, "0113"));
    assert_eq!(draft.emission_date, "01/03");
    assert!(draft.set_header(HeaderField::Guia, "G-77"));
    assert_eq!(draft.header(HeaderField::Guia), "G-77");
  }

  #[test]
  fn test_from_record() {
    let record = PreviaRecord {
      id: 7,
      patient_id: 42,
      guia: "G1".to_string(),
      protocol: "Protocolo A".to_string(),
      cid: "C509".to_string(),
      clinic: "Clínica Central".to_string(),
      planned_cycles: Some(4),
      emission_date: NaiveDate::from_ymd_opt(2024, 3, 1),
      forwarding_date: None,
      request_date: None,
      weight_kg: Some(72.5),
      height_cm: Some(170.0),
      pareceres: Vec::new(),
    };
    let draft = FormDraft::from_record(&record, Vec::new(), None, NOW);
    assert_eq!(draft.previa_id, Some(7));
    assert_eq!(draft.emission_date, "01/03/2024");
    assert_eq!(draft.weight, "72,5");
    assert_eq!(draft.height, "170");
    assert_eq!(draft.pareceres.len(), 1);
    assert_eq!(draft.weight_kg(), Some(72.5));
  }

  #[test]
  fn test_remove_attachment() {
    let mut draft = filled();
    draft.add_attachment(DraftAttachment::Pending {
      path: PathBuf::from("/tmp/laudo.pdf"),
      name: "laudo.pdf".to_string(),
      size: 10,
      mime_type: "application/pdf".to_string(),
    });
    assert!(draft.remove_attachment(3).is_none());
    let removed = draft.remove_attachment(0).unwrap();
    assert_eq!(removed.name(), "laudo.pdf");
    assert!(draft.attachments.is_empty());
  }
}
