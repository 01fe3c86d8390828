//! Serde types matching the PHP API's JSON.
//!
//! The server is loose about types: ids and numbers may arrive as strings,
//! decimals with a comma, dates as ISO, Brazilian or zeroed strings, and
//! bodies with or without a `{"data": ...}` envelope. Everything is coerced
//! here so the rest of the crate only sees the typed domain structs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::{
  Attachment, CycleEntry, DoseUnit, Finalization, GuideOpinion, ParecerRegistro, Patient,
  PreviaInput, PreviaRecord, Protocol, ProtocolDrug,
};
use crate::error::NetworkError;

/// Parse a response body into `T`, accepting an optional `data` envelope.
pub fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, NetworkError> {
  let inner = match body {
    Value::Object(mut map) if map.contains_key("data") && !map.contains_key("id") => {
      map.remove("data").unwrap_or(Value::Null)
    }
    other => other,
  };
  Ok(serde_json::from_value(inner)?)
}

// ============================================================================
// Lenient field deserializers
// ============================================================================

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
  let value = Value::deserialize(d)?;
  value_to_u64(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {}", value)))
}

fn de_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
  let value = Option::<Value>::deserialize(d)?;
  Ok(value.as_ref().and_then(value_to_u64))
}

fn de_opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
  Ok(de_opt_u64(d)?.and_then(|n| u32::try_from(n).ok()))
}

fn de_opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
  let value = Option::<Value>::deserialize(d)?;
  Ok(value.as_ref().and_then(value_to_f64).map(|f| f as i64))
}

fn de_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
  let value = Option::<Value>::deserialize(d)?;
  Ok(value.as_ref().and_then(value_to_f64))
}

fn de_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
  Ok(de_opt_f64(d)?.unwrap_or(0.0))
}

fn de_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
  let value = Option::<Value>::deserialize(d)?;
  Ok(match value {
    Some(Value::String(s)) => s,
    Some(Value::Null) | None => String::new(),
    Some(other) => other.to_string(),
  })
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
  let s = de_string(d)?;
  Ok(if s.trim().is_empty() { None } else { Some(s) })
}

fn de_opt_date<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
  Ok(de_opt_string(d)?.and_then(|s| parse_api_date(&s)))
}

fn de_opt_datetime<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
  Ok(de_opt_string(d)?.and_then(|s| parse_api_datetime(&s)))
}

fn value_to_u64(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn value_to_f64(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => parse_decimal(s),
    _ => None,
  }
}

/// Parse "72.5" or "72,5".
pub fn parse_decimal(s: &str) -> Option<f64> {
  let s = s.trim();
  if s.is_empty() {
    return None;
  }
  s.replace(',', ".")
    .parse::<f64>()
    .ok()
    .filter(|f| f.is_finite())
}

/// Accepts "2024-03-01", "2024-03-01 10:00:00" and "01/03/2024"; zero dates are absent.
pub fn parse_api_date(s: &str) -> Option<NaiveDate> {
  let s = s.trim();
  if s.starts_with("0000") {
    return None;
  }
  let date_part = s.get(..10).unwrap_or(s);
  NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
    .or_else(|_| NaiveDate::parse_from_str(date_part, "%d/%m/%Y"))
    .ok()
}

fn parse_api_datetime(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .ok()
    .or_else(|| {
      NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
    })
}

fn format_api_date(date: Option<NaiveDate>) -> Option<String> {
  date.map(|d| d.format("%Y-%m-%d").to_string())
}

// ============================================================================
// Patients and protocols
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPatient {
  #[serde(deserialize_with = "de_id")]
  pub id: u64,
  #[serde(default, deserialize_with = "de_string")]
  pub nome: String,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub cpf: Option<String>,
  #[serde(default, deserialize_with = "de_opt_date")]
  pub data_nascimento: Option<NaiveDate>,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub operadora: Option<String>,
}

impl From<ApiPatient> for Patient {
  fn from(p: ApiPatient) -> Self {
    Patient {
      id: p.id,
      name: p.nome,
      document: p.cpf,
      birth_date: p.data_nascimento,
      insurer: p.operadora,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiProtocolDrug {
  #[serde(default, deserialize_with = "de_string")]
  pub nome: String,
  #[serde(default, deserialize_with = "de_f64")]
  pub dose: f64,
  #[serde(default, deserialize_with = "de_string")]
  pub unidade: String,
}

impl ApiProtocolDrug {
  fn into_domain(self) -> ProtocolDrug {
    let unit = match self.unidade.trim().to_lowercase().as_str() {
      "mg/m2" | "mg/m²" => DoseUnit::MgPerM2,
      "mg/kg" => DoseUnit::MgPerKg,
      "auc" => DoseUnit::Auc,
      _ => DoseUnit::Fixed,
    };
    ProtocolDrug {
      name: self.nome,
      dose: self.dose,
      unit,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiProtocol {
  #[serde(deserialize_with = "de_id")]
  pub id: u64,
  #[serde(default, deserialize_with = "de_string")]
  pub nome: String,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub cid: Option<String>,
  #[serde(default, deserialize_with = "de_opt_u32")]
  pub ciclos: Option<u32>,
  #[serde(default)]
  pub medicamentos: Vec<ApiProtocolDrug>,
}

impl From<ApiProtocol> for Protocol {
  fn from(p: ApiProtocol) -> Self {
    Protocol {
      id: p.id,
      name: p.nome,
      cid: p.cid,
      cycles: p.ciclos,
      drugs: p
        .medicamentos
        .into_iter()
        .map(ApiProtocolDrug::into_domain)
        .collect(),
    }
  }
}

// ============================================================================
// Prévias and pareceres
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct ApiParecer {
  #[serde(deserialize_with = "de_id")]
  pub id: u64,
  #[serde(default, deserialize_with = "de_string")]
  pub parecer: String,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub parecer_guia: Option<String>,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub finalizacao: Option<String>,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub data_solicitacao: Option<String>,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub data_parecer: Option<String>,
  #[serde(default, deserialize_with = "de_opt_i64")]
  pub tempo_analise: Option<i64>,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub criado_por: Option<String>,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub editado_por: Option<String>,
  #[serde(default, deserialize_with = "de_opt_datetime", skip_serializing)]
  pub criado_em: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "de_opt_datetime", skip_serializing)]
  pub atualizado_em: Option<DateTime<Utc>>,
}

impl ApiParecer {
  fn into_domain(self) -> ParecerRegistro {
    let guide_opinion = self.parecer_guia.as_deref().and_then(|s| {
      let parsed = GuideOpinion::from_api_str(s);
      if parsed.is_none() {
        tracing::warn!(value = s, "unknown parecer_guia value");
      }
      parsed
    });
    let finalization = self.finalizacao.as_deref().and_then(|s| {
      let parsed = Finalization::from_api_str(s);
      if parsed.is_none() {
        tracing::warn!(value = s, "unknown finalizacao value");
      }
      parsed
    });

    ParecerRegistro {
      id: u32::try_from(self.id).unwrap_or(u32::MAX),
      technical_opinion: self.parecer,
      guide_opinion,
      finalization,
      request_date: self.data_solicitacao.as_deref().and_then(parse_api_date),
      opinion_date: self.data_parecer.as_deref().and_then(parse_api_date),
      analysis_days: self.tempo_analise,
      created_by: self.criado_por,
      updated_by: self.editado_por,
      created_at: self.criado_em,
      updated_at: self.atualizado_em,
    }
  }

  fn from_domain(p: &ParecerRegistro) -> Self {
    ApiParecer {
      id: u64::from(p.id),
      parecer: p.technical_opinion.clone(),
      parecer_guia: p.guide_opinion.map(|g| g.as_api_str().to_string()),
      finalizacao: p.finalization.map(|f| f.as_api_str().to_string()),
      data_solicitacao: format_api_date(p.request_date),
      data_parecer: format_api_date(p.opinion_date),
      tempo_analise: p.analysis_days,
      criado_por: p.created_by.clone(),
      editado_por: p.updated_by.clone(),
      criado_em: None,
      atualizado_em: None,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiPrevia {
  #[serde(deserialize_with = "de_id")]
  pub id: u64,
  #[serde(deserialize_with = "de_id")]
  pub paciente_id: u64,
  #[serde(default, deserialize_with = "de_string")]
  pub guia: String,
  #[serde(default, deserialize_with = "de_string")]
  pub protocolo: String,
  #[serde(default, deserialize_with = "de_string")]
  pub cid: String,
  #[serde(default, deserialize_with = "de_string")]
  pub clinica: String,
  #[serde(default, deserialize_with = "de_opt_u32")]
  pub ciclos_previstos: Option<u32>,
  #[serde(default, deserialize_with = "de_opt_date")]
  pub data_emissao: Option<NaiveDate>,
  #[serde(default, deserialize_with = "de_opt_date")]
  pub data_encaminhamento: Option<NaiveDate>,
  #[serde(default, deserialize_with = "de_opt_date")]
  pub data_solicitacao: Option<NaiveDate>,
  #[serde(default, deserialize_with = "de_opt_f64")]
  pub peso: Option<f64>,
  #[serde(default, deserialize_with = "de_opt_f64")]
  pub altura: Option<f64>,
  #[serde(default)]
  pub pareceres: Vec<ApiParecer>,
}

impl From<ApiPrevia> for PreviaRecord {
  fn from(p: ApiPrevia) -> Self {
    PreviaRecord {
      id: p.id,
      patient_id: p.paciente_id,
      guia: p.guia,
      protocol: p.protocolo,
      cid: p.cid,
      clinic: p.clinica,
      planned_cycles: p.ciclos_previstos,
      emission_date: p.data_emissao,
      forwarding_date: p.data_encaminhamento,
      request_date: p.data_solicitacao,
      weight_kg: p.peso,
      height_cm: p.altura,
      pareceres: p
        .pareceres
        .into_iter()
        .map(ApiParecer::into_domain)
        .collect(),
    }
  }
}

/// Body of create/update requests.
#[derive(Debug, Serialize)]
pub struct ApiPreviaPayload {
  pub paciente_id: u64,
  pub guia: String,
  pub protocolo: String,
  pub cid: String,
  pub clinica: String,
  pub ciclos_previstos: Option<u32>,
  pub data_emissao: Option<String>,
  pub data_encaminhamento: Option<String>,
  pub data_solicitacao: Option<String>,
  pub peso: Option<f64>,
  pub altura: Option<f64>,
  pub pareceres: Vec<ApiParecer>,
}

impl From<&PreviaInput> for ApiPreviaPayload {
  fn from(input: &PreviaInput) -> Self {
    ApiPreviaPayload {
      paciente_id: input.patient_id,
      guia: input.guia.trim().to_string(),
      protocolo: input.protocol.trim().to_string(),
      cid: input.cid.trim().to_uppercase(),
      clinica: input.clinic.trim().to_string(),
      ciclos_previstos: input.planned_cycles,
      data_emissao: format_api_date(input.emission_date),
      data_encaminhamento: format_api_date(input.forwarding_date),
      data_solicitacao: format_api_date(input.request_date),
      peso: input.weight_kg,
      altura: input.height_cm,
      pareceres: input.pareceres.iter().map(ApiParecer::from_domain).collect(),
    }
  }
}

// ============================================================================
// Cycles and attachments
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCycle {
  #[serde(deserialize_with = "de_id")]
  pub id: u64,
  #[serde(default, deserialize_with = "de_opt_u32")]
  pub ciclo: Option<u32>,
  #[serde(default, deserialize_with = "de_opt_u32")]
  pub dia: Option<u32>,
  #[serde(default, deserialize_with = "de_opt_date")]
  pub data: Option<NaiveDate>,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub status: Option<String>,
}

impl From<ApiCycle> for CycleEntry {
  fn from(c: ApiCycle) -> Self {
    CycleEntry {
      id: c.id,
      cycle: c.ciclo.unwrap_or(0),
      day: c.dia.unwrap_or(0),
      date: c.data,
      status: c.status,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiAttachment {
  #[serde(deserialize_with = "de_id")]
  pub id: u64,
  #[serde(deserialize_with = "de_id")]
  pub previa_id: u64,
  #[serde(default, deserialize_with = "de_string")]
  pub nome: String,
  #[serde(default, deserialize_with = "de_opt_u64")]
  pub tamanho: Option<u64>,
  #[serde(default, deserialize_with = "de_string")]
  pub tipo: String,
  #[serde(default, deserialize_with = "de_opt_string")]
  pub url: Option<String>,
}

impl From<ApiAttachment> for Attachment {
  fn from(a: ApiAttachment) -> Self {
    Attachment {
      id: a.id,
      previa_id: a.previa_id,
      name: a.nome,
      size: a.tamanho.unwrap_or(0),
      mime_type: if a.tipo.is_empty() {
        "application/octet-stream".to_string()
      } else {
        a.tipo
      },
      url: a.url,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_previa_with_loose_types() {
    let body = json!({
      "data": {
        "id": "17",
        "paciente_id": 42,
        "guia": "G1",
        "protocolo": "Protocolo A",
        "cid": "C509",
        "clinica": null,
        "ciclos_previstos": "6",
        "data_emissao": "2024-03-01",
        "data_encaminhamento": "0000-00-00",
        "data_solicitacao": "05/03/2024",
        "peso": "72,5",
        "altura": 170,
        "pareceres": [{
          "id": "1",
          "parecer": "Sem objeções",
          "parecer_guia": "favoravel",
          "finalizacao": "algo_novo",
          "data_solicitacao": "2024-03-01 08:00:00",
          "data_parecer": "2024-03-05",
          "tempo_analise": "4",
          "criado_em": "2024-03-01 08:00:00"
        }]
      }
    });

    let previa: PreviaRecord = parse_body::<ApiPrevia>(body).unwrap().into();
    assert_eq!(previa.id, 17);
    assert_eq!(previa.clinic, "");
    assert_eq!(previa.planned_cycles, Some(6));
    assert_eq!(previa.forwarding_date, None);
    assert_eq!(
      previa.request_date,
      NaiveDate::from_ymd_opt(2024, 3, 5)
    );
    assert_eq!(previa.weight_kg, Some(72.5));
    assert_eq!(previa.height_cm, Some(170.0));

    let parecer = &previa.pareceres[0];
    assert_eq!(parecer.guide_opinion, Some(GuideOpinion::Favoravel));
    assert_eq!(parecer.finalization, None);
    assert_eq!(parecer.analysis_days, Some(4));
    assert_eq!(parecer.request_date, NaiveDate::from_ymd_opt(2024, 3, 1));
    assert!(parecer.created_at.is_some());
  }

  #[test]
  fn test_parse_list_without_envelope() {
    let body = json!([{"id": 1, "nome": "Ana"}, {"id": "2", "nome": "Bia", "cpf": ""}]);
    let patients: Vec<ApiPatient> = parse_body(body).unwrap();
    assert_eq!(patients.len(), 2);
    assert_eq!(patients[1].id, 2);
    assert_eq!(patients[1].cpf, None);
  }

  #[test]
  fn test_reject_missing_id() {
    let body = json!({"data": [{"nome": "sem id"}]});
    let err = parse_body::<Vec<ApiPatient>>(body).unwrap_err();
    assert!(matches!(err, NetworkError::InvalidPayload(_)));
  }

  #[test]
  fn test_protocol_units() {
    let body = json!({"id": 3, "nome": "FOLFOX", "medicamentos": [
      {"nome": "Oxaliplatina", "dose": "85", "unidade": "mg/m2"},
      {"nome": "Carboplatina", "dose": 5, "unidade": "AUC"},
      {"nome": "Ondansetrona", "dose": 8, "unidade": "mg"}
    ]});
    let protocol: Protocol = parse_body::<ApiProtocol>(body).unwrap().into();
    let units: Vec<DoseUnit> = protocol.drugs.iter().map(|d| d.unit).collect();
    assert_eq!(units, vec![DoseUnit::MgPerM2, DoseUnit::Auc, DoseUnit::Fixed]);
    assert_eq!(protocol.drugs[0].dose, 85.0);
  }

  #[test]
  fn test_payload_uses_iso_dates() {
    let input = PreviaInput {
      patient_id: 42,
      guia: " G1 ".to_string(),
      protocol: "Protocolo A".to_string(),
      cid: "c509".to_string(),
      clinic: "Central".to_string(),
      planned_cycles: Some(6),
      emission_date: NaiveDate::from_ymd_opt(2024, 3, 1),
      forwarding_date: None,
      request_date: None,
      weight_kg: None,
      height_cm: None,
      pareceres: vec![],
    };
    let value = serde_json::to_value(ApiPreviaPayload::from(&input)).unwrap();
    assert_eq!(value["guia"], "G1");
    assert_eq!(value["cid"], "C509");
    assert_eq!(value["data_emissao"], "2024-03-01");
    assert_eq!(value["data_encaminhamento"], Value::Null);
  }

  #[test]
  fn test_parse_decimal() {
    assert_eq!(parse_decimal("1,75"), Some(1.75));
    assert_eq!(parse_decimal(" 80 "), Some(80.0));
    assert_eq!(parse_decimal(""), None);
    assert_eq!(parse_decimal("abc"), None);
  }
}
