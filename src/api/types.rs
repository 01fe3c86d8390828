use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FieldIssue, ValidationError};

/// Registered patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
  pub id: u64,
  pub name: String,
  pub document: Option<String>,
  pub birth_date: Option<NaiveDate>,
  pub insurer: Option<String>,
}

/// How a protocol drug dose is prescribed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DoseUnit {
  /// mg per m² of body surface
  MgPerM2,
  /// mg per kg of body weight
  MgPerKg,
  /// Target AUC (Calvert formula)
  Auc,
  /// Fixed dose in mg
  Fixed,
}

/// One drug of a treatment protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDrug {
  pub name: String,
  pub dose: f64,
  pub unit: DoseUnit,
}

/// Registered treatment protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
  pub id: u64,
  pub name: String,
  pub cid: Option<String>,
  pub cycles: Option<u32>,
  pub drugs: Vec<ProtocolDrug>,
}

/// Guide opinion recorded for a review cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideOpinion {
  Favoravel,
  FavoravelComRessalvas,
  Inconclusivo,
  Desfavoravel,
}

impl GuideOpinion {
  pub const ALL: [GuideOpinion; 4] = [
    GuideOpinion::Favoravel,
    GuideOpinion::FavoravelComRessalvas,
    GuideOpinion::Inconclusivo,
    GuideOpinion::Desfavoravel,
  ];

  /// Value used by the server
  pub fn as_api_str(&self) -> &'static str {
    match self {
      GuideOpinion::Favoravel => "favoravel",
      GuideOpinion::FavoravelComRessalvas => "favoravel_ressalvas",
      GuideOpinion::Inconclusivo => "inconclusivo",
      GuideOpinion::Desfavoravel => "desfavoravel",
    }
  }

  pub fn from_api_str(s: &str) -> Option<Self> {
    let s = s.trim().to_lowercase();
    Self::ALL.into_iter().find(|o| o.as_api_str() == s)
  }
}

impl fmt::Display for GuideOpinion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      GuideOpinion::Favoravel => "Favorável",
      GuideOpinion::FavoravelComRessalvas => "Favorável com ressalvas",
      GuideOpinion::Inconclusivo => "Inconclusivo",
      GuideOpinion::Desfavoravel => "Desfavorável",
    };
    f.write_str(label)
  }
}

/// Final status of a review cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finalization {
  Pendente,
  Autorizada,
  AutorizadaParcial,
  Negada,
  Cancelada,
}

impl Finalization {
  pub const ALL: [Finalization; 5] = [
    Finalization::Pendente,
    Finalization::Autorizada,
    Finalization::AutorizadaParcial,
    Finalization::Negada,
    Finalization::Cancelada,
  ];

  pub fn as_api_str(&self) -> &'static str {
    match self {
      Finalization::Pendente => "pendente",
      Finalization::Autorizada => "autorizada",
      Finalization::AutorizadaParcial => "autorizada_parcial",
      Finalization::Negada => "negada",
      Finalization::Cancelada => "cancelada",
    }
  }

  pub fn from_api_str(s: &str) -> Option<Self> {
    let s = s.trim().to_lowercase();
    Self::ALL.into_iter().find(|o| o.as_api_str() == s)
  }
}

impl fmt::Display for Finalization {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      Finalization::Pendente => "Pendente",
      Finalization::Autorizada => "Autorizada",
      Finalization::AutorizadaParcial => "Autorizada parcialmente",
      Finalization::Negada => "Negada",
      Finalization::Cancelada => "Cancelada",
    };
    f.write_str(label)
  }
}

/// One review cycle of a prévia
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParecerRegistro {
  /// Unique within the parent prévia
  pub id: u32,
  pub technical_opinion: String,
  pub guide_opinion: Option<GuideOpinion>,
  pub finalization: Option<Finalization>,
  pub request_date: Option<NaiveDate>,
  pub opinion_date: Option<NaiveDate>,
  /// Days between request and opinion
  pub analysis_days: Option<i64>,
  pub created_by: Option<String>,
  pub updated_by: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

/// Insurance pre-authorization request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviaRecord {
  pub id: u64,
  pub patient_id: u64,
  pub guia: String,
  pub protocol: String,
  pub cid: String,
  pub clinic: String,
  pub planned_cycles: Option<u32>,
  pub emission_date: Option<NaiveDate>,
  pub forwarding_date: Option<NaiveDate>,
  pub request_date: Option<NaiveDate>,
  pub weight_kg: Option<f64>,
  pub height_cm: Option<f64>,
  pub pareceres: Vec<ParecerRegistro>,
}

impl PreviaRecord {
  /// Status of the latest review cycle, for list display.
  pub fn current_status(&self) -> Option<Finalization> {
    self.pareceres.last().and_then(|p| p.finalization)
  }
}

/// Prévia fields sent on create/update
#[derive(Debug, Clone, PartialEq)]
pub struct PreviaInput {
  pub patient_id: u64,
  pub guia: String,
  pub protocol: String,
  pub cid: String,
  pub clinic: String,
  pub planned_cycles: Option<u32>,
  pub emission_date: Option<NaiveDate>,
  pub forwarding_date: Option<NaiveDate>,
  pub request_date: Option<NaiveDate>,
  pub weight_kg: Option<f64>,
  pub height_cm: Option<f64>,
  pub pareceres: Vec<ParecerRegistro>,
}

impl PreviaInput {
  /// Required fields before anything is sent to the server.
  pub fn validate(&self) -> Result<(), ValidationError> {
    let required: [(&'static str, bool, &str); 5] = [
      ("paciente", self.patient_id != 0, "Selecione o paciente"),
      ("clinica", !self.clinic.trim().is_empty(), "Informe a clínica/prestador"),
      ("guia", !self.guia.trim().is_empty(), "Informe o número da guia"),
      ("protocolo", !self.protocol.trim().is_empty(), "Informe o protocolo"),
      ("cid", !self.cid.trim().is_empty(), "Informe o CID"),
    ];

    let issues: Vec<FieldIssue> = required
      .into_iter()
      .filter(|(_, present, _)| !present)
      .map(|(field, _, message)| FieldIssue::new(field, message))
      .collect();

    if issues.is_empty() {
      Ok(())
    } else {
      Err(ValidationError { issues })
    }
  }
}

/// Treatment cycle/day scheduled for a prévia
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEntry {
  pub id: u64,
  pub cycle: u32,
  pub day: u32,
  pub date: Option<NaiveDate>,
  pub status: Option<String>,
}

/// Attachment persisted on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
  pub id: u64,
  pub previa_id: u64,
  pub name: String,
  pub size: u64,
  pub mime_type: String,
  pub url: Option<String>,
}

/// File picked locally, not yet uploaded
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentUpload {
  pub name: String,
  pub mime_type: String,
  pub bytes: Vec<u8>,
}
