//! Editable list of parecer registros (review cycles) of a prévia draft.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::warn;

use super::field::{FieldEvent, FieldModel};
use super::mask::{analysis_days, apply_date_mask, format_br_date, parse_br_date};
use crate::api::types::{Finalization, GuideOpinion, ParecerRegistro};
use crate::error::FormError;

pub const MAX_PARECERES: usize = 5;

/// Shown instead of the analysis time while a date is incomplete.
pub const ANALYSIS_HINT: &str = "Preencha as duas datas completas";

/// Text fields of a registro that go through debounced editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParecerField {
  TechnicalOpinion,
  RequestDate,
  OpinionDate,
}

impl ParecerField {
  pub const ALL: [ParecerField; 3] = [
    ParecerField::TechnicalOpinion,
    ParecerField::RequestDate,
    ParecerField::OpinionDate,
  ];

  pub fn is_date(&self) -> bool {
    !matches!(self, ParecerField::TechnicalOpinion)
  }

  /// Field name used in `ValidationError` issues for registro `id`
  pub fn issue_key(&self, id: u32) -> String {
    let name = match self {
      ParecerField::TechnicalOpinion => "parecer_tecnico",
      ParecerField::RequestDate => "data_solicitacao",
      ParecerField::OpinionDate => "data_parecer",
    };
    format!("parecer_{}_{}", id, name)
  }

  pub fn label(&self) -> &'static str {
    match self {
      ParecerField::TechnicalOpinion => "Parecer técnico",
      ParecerField::RequestDate => "Data solicitação",
      ParecerField::OpinionDate => "Data parecer",
    }
  }
}

/// Authoritative state of one registro. Dates are kept as masked text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParecerEntry {
  pub id: u32,
  pub technical_opinion: String,
  pub guide_opinion: Option<GuideOpinion>,
  pub finalization: Option<Finalization>,
  pub request_date: String,
  pub opinion_date: String,
  pub analysis_days: Option<i64>,
  pub created_by: Option<String>,
  pub updated_by: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

impl ParecerEntry {
  fn blank(id: u32) -> Self {
    Self {
      id,
      technical_opinion: String::new(),
      guide_opinion: None,
      finalization: None,
      request_date: String::new(),
      opinion_date: String::new(),
      analysis_days: None,
      created_by: None,
      updated_by: None,
      created_at: None,
      updated_at: None,
    }
  }

  fn from_registro(registro: &ParecerRegistro) -> Self {
    let request_date = format_br_date(registro.request_date);
    let opinion_date = format_br_date(registro.opinion_date);
    Self {
      id: registro.id,
      technical_opinion: registro.technical_opinion.clone(),
      guide_opinion: registro.guide_opinion,
      finalization: registro.finalization,
      analysis_days: analysis_days(&request_date, &opinion_date).or(registro.analysis_days),
      request_date,
      opinion_date,
      created_by: registro.created_by.clone(),
      updated_by: registro.updated_by.clone(),
      created_at: registro.created_at,
      updated_at: registro.updated_at,
    }
  }

  pub fn value(&self, field: ParecerField) -> &str {
    match field {
      ParecerField::TechnicalOpinion => &self.technical_opinion,
      ParecerField::RequestDate => &self.request_date,
      ParecerField::OpinionDate => &self.opinion_date,
    }
  }

  fn value_mut(&mut self, field: ParecerField) -> &mut String {
    match field {
      ParecerField::TechnicalOpinion => &mut self.technical_opinion,
      ParecerField::RequestDate => &mut self.request_date,
      ParecerField::OpinionDate => &mut self.opinion_date,
    }
  }

  fn recompute_analysis(&mut self) {
    self.analysis_days = analysis_days(&self.request_date, &self.opinion_date);
  }

  pub fn to_registro(&self) -> ParecerRegistro {
    ParecerRegistro {
      id: self.id,
      technical_opinion: self.technical_opinion.trim().to_string(),
      guide_opinion: self.guide_opinion,
      finalization: self.finalization,
      request_date: parse_br_date(&self.request_date),
      opinion_date: parse_br_date(&self.opinion_date),
      analysis_days: self.analysis_days,
      created_by: self.created_by.clone(),
      updated_by: self.updated_by.clone(),
      created_at: self.created_at,
      updated_at: self.updated_at,
    }
  }
}

/// Registros plus the in-flight edit state of each of their text fields.
///
/// Each (registro, field) pair owns its own [`FieldModel`]; commits merge one
/// field into one entry, so edits to different fields never interfere.
#[derive(Debug, Clone)]
pub struct ParecerForm {
  entries: Vec<ParecerEntry>,
  fields: HashMap<(u32, ParecerField), FieldModel>,
  next_id: u32,
  user: Option<String>,
}

impl ParecerForm {
  /// A form with a single blank registro.
  pub fn new(user: Option<String>, now_ms: i64) -> Self {
    let mut form = Self {
      entries: Vec::new(),
      fields: HashMap::new(),
      next_id: 1,
      user,
    };
    form.push_blank(now_ms);
    form
  }

  /// Load the registros of a saved prévia.
  ///
  /// Registros beyond the limit are kept so a later update does not delete
  /// them on the server; only `add` is refused while the list is over it.
  pub fn from_registros(
    registros: &[ParecerRegistro],
    user: Option<String>,
    now_ms: i64,
  ) -> Self {
    if registros.is_empty() {
      return Self::new(user, now_ms);
    }
    if registros.len() > MAX_PARECERES {
      warn!(
        count = registros.len(),
        max = MAX_PARECERES,
        "prévia has more pareceres than the form allows"
      );
    }
    let entries: Vec<ParecerEntry> = registros
      .iter()
      .map(ParecerEntry::from_registro)
      .collect();
    let next_id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
    Self {
      entries,
      fields: HashMap::new(),
      next_id,
      user,
    }
  }

  pub fn entries(&self) -> &[ParecerEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn get(&self, id: u32) -> Option<&ParecerEntry> {
    self.entries.iter().find(|e| e.id == id)
  }

  fn position(&self, id: u32) -> Result<usize, FormError> {
    self
      .entries
      .iter()
      .position(|e| e.id == id)
      .ok_or(FormError::UnknownParecer(id))
  }

  fn push_blank(&mut self, now_ms: i64) -> u32 {
    let id = self.next_id;
    self.next_id += 1;
    let mut entry = ParecerEntry::blank(id);
    entry.created_by = self.user.clone();
    entry.created_at = DateTime::from_timestamp_millis(now_ms);
    self.entries.push(entry);
    id
  }

  /// Append a blank registro. Rejected once the list is full.
  pub fn add(&mut self, now_ms: i64) -> Result<u32, FormError> {
    if self.entries.len() >= MAX_PARECERES {
      return Err(FormError::ParecerLimit { max: MAX_PARECERES });
    }
    Ok(self.push_blank(now_ms))
  }

  /// Remove a registro. Rejected if it is the last one.
  pub fn remove(&mut self, id: u32) -> Result<(), FormError> {
    let idx = self.position(id)?;
    if self.entries.len() <= 1 {
      return Err(FormError::LastParecer);
    }
    self.entries.remove(idx);
    self.fields.retain(|(entry_id, _), _| *entry_id != id);
    Ok(())
  }

  /// Current text of a field as the user sees it, including uncommitted input.
  pub fn display_value(&self, id: u32, field: ParecerField) -> &str {
    if let Some(model) = self.fields.get(&(id, field)) {
      return &model.local;
    }
    self.get(id).map(|e| e.value(field)).unwrap_or("")
  }

  fn model(&mut self, id: u32, field: ParecerField) -> Result<&mut FieldModel, FormError> {
    let idx = self.position(id)?;
    let current = self.entries[idx].value(field).to_string();
    Ok(
      self
        .fields
        .entry((id, field))
        .or_insert_with(|| FieldModel::new(current)),
    )
  }

  /// Feed raw keyboard input to a field.
  ///
  /// Date fields are masked; input that would produce an impossible date is
  /// rejected, the field keeps its previous value and `Ok(false)` is returned.
  pub fn input(
    &mut self,
    id: u32,
    field: ParecerField,
    raw: &str,
    now_ms: i64,
  ) -> Result<bool, FormError> {
    let value = if field.is_date() {
      match apply_date_mask(raw) {
        Some(masked) => masked,
        None => return Ok(false),
      }
    } else {
      raw.to_string()
    };

    self.model(id, field)?.dispatch(FieldEvent::Input {
      value,
      at_ms: now_ms,
    });
    Ok(true)
  }

  /// Field lost focus: commit it if dirty.
  pub fn blur(&mut self, id: u32, field: ParecerField, now_ms: i64) -> Result<(), FormError> {
    let commit = self.model(id, field)?.dispatch(FieldEvent::Blur);
    if let Some(value) = commit {
      self.merge(id, field, value, now_ms)?;
    }
    Ok(())
  }

  /// Commit every field whose debounce window elapsed. Returns how many committed.
  pub fn tick(&mut self, now_ms: i64) -> usize {
    self.drive(FieldEvent::Tick { now_ms }, now_ms)
  }

  /// Commit every dirty field right away (before saving).
  pub fn flush(&mut self, now_ms: i64) -> usize {
    self.drive(FieldEvent::Blur, now_ms)
  }

  fn drive(&mut self, event: FieldEvent, now_ms: i64) -> usize {
    let due: Vec<((u32, ParecerField), String)> = self
      .fields
      .iter_mut()
      .filter_map(|(key, model)| model.dispatch(event.clone()).map(|v| (*key, v)))
      .collect();

    let count = due.len();
    for ((id, field), value) in due {
      if let Err(e) = self.merge(id, field, value, now_ms) {
        tracing::debug!(error = %e, "dropping commit for removed parecer");
      }
    }
    count
  }

  pub fn has_pending_edits(&self) -> bool {
    self.fields.values().any(|m| m.is_dirty())
  }

  fn merge(
    &mut self,
    id: u32,
    field: ParecerField,
    value: String,
    now_ms: i64,
  ) -> Result<(), FormError> {
    let idx = self.position(id)?;
    let user = self.user.clone();
    let entry = &mut self.entries[idx];

    *entry.value_mut(field) = value;
    if field.is_date() {
      entry.recompute_analysis();
    }
    entry.updated_by = user;
    entry.updated_at = DateTime::from_timestamp_millis(now_ms);

    if let Some(model) = self.fields.get_mut(&(id, field)) {
      model.dispatch(FieldEvent::Committed);
    }
    Ok(())
  }

  /// Set the guide opinion, auto-filling an empty request date.
  ///
  /// The first registro takes the prévia's forwarding date when there is one,
  /// otherwise today; later registros always take today.
  pub fn set_guide_opinion(
    &mut self,
    id: u32,
    opinion: Option<GuideOpinion>,
    forwarding_date: Option<NaiveDate>,
    today: NaiveDate,
    now_ms: i64,
  ) -> Result<(), FormError> {
    let idx = self.position(id)?;
    let user = self.user.clone();
    let entry = &mut self.entries[idx];
    entry.guide_opinion = opinion;
    entry.updated_by = user;
    entry.updated_at = DateTime::from_timestamp_millis(now_ms);

    if opinion.is_none() || !entry.request_date.is_empty() {
      return Ok(());
    }

    let fill = if idx == 0 {
      forwarding_date.unwrap_or(today)
    } else {
      today
    };
    entry.request_date = format_br_date(Some(fill));
    entry.recompute_analysis();
    let request_date = entry.request_date.clone();

    if let Some(model) = self.fields.get_mut(&(id, ParecerField::RequestDate)) {
      model.dispatch(FieldEvent::External(request_date));
    }
    Ok(())
  }

  pub fn set_finalization(
    &mut self,
    id: u32,
    finalization: Option<Finalization>,
    now_ms: i64,
  ) -> Result<(), FormError> {
    let idx = self.position(id)?;
    let user = self.user.clone();
    let entry = &mut self.entries[idx];
    entry.finalization = finalization;
    entry.updated_by = user;
    entry.updated_at = DateTime::from_timestamp_millis(now_ms);
    Ok(())
  }

  /// Analysis time label: the number of days, or the hint while a date is incomplete.
  pub fn analysis_label(&self, id: u32) -> String {
    match self.get(id).and_then(|e| e.analysis_days) {
      Some(days) => format!("{} dia(s)", days),
      None => ANALYSIS_HINT.to_string(),
    }
  }

  pub fn to_registros(&self) -> Vec<ParecerRegistro> {
    self.entries.iter().map(ParecerEntry::to_registro).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NOW: i64 = 1_709_251_200_000; // 2024-03-01T00:00:00Z

  fn date(d: u32, m: u32, y: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn type_and_blur(form: &mut ParecerForm, id: u32, field: ParecerField, raw: &str) {
    form.input(id, field, raw, NOW).unwrap();
    form.blur(id, field, NOW).unwrap();
  }

  #[test]
  fn test_new_form_has_one_registro() {
    let form = ParecerForm::new(Some("Maria".to_string()), NOW);
    assert_eq!(form.len(), 1);
    assert_eq!(form.entries()[0].created_by.as_deref(), Some("Maria"));
    assert!(form.entries()[0].created_at.is_some());
  }

  #[test]
  fn test_sixth_registro_rejected() {
    let mut form = ParecerForm::new(None, NOW);
    for _ in 0..4 {
      form.add(NOW).unwrap();
    }
    assert_eq!(form.len(), 5);

    assert_eq!(
      form.add(NOW),
      Err(FormError::ParecerLimit { max: MAX_PARECERES })
    );
    assert_eq!(form.len(), 5);
  }

  #[test]
  fn test_last_registro_cannot_be_removed() {
    let mut form = ParecerForm::new(None, NOW);
    let first = form.entries()[0].id;
    assert_eq!(form.remove(first), Err(FormError::LastParecer));

    let second = form.add(NOW).unwrap();
    form.remove(first).unwrap();
    assert_eq!(form.len(), 1);
    assert_eq!(form.entries()[0].id, second);
    assert_eq!(form.remove(99), Err(FormError::UnknownParecer(99)));
  }

  #[test]
  fn test_ids_stay_unique_after_removal() {
    let mut form = ParecerForm::new(None, NOW);
    let a = form.add(NOW).unwrap();
    form.remove(a).unwrap();
    let b = form.add(NOW).unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn test_opinion_commits_on_blur_only() {
    let mut form = ParecerForm::new(Some("Ana".to_string()), NOW);
    let id = form.entries()[0].id;

    form.input(id, ParecerField::TechnicalOpinion, "A", NOW).unwrap();
    form.input(id, ParecerField::TechnicalOpinion, "AB", NOW + 100).unwrap();
    form.input(id, ParecerField::TechnicalOpinion, "ABC", NOW + 200).unwrap();
    assert_eq!(form.get(id).unwrap().technical_opinion, "");
    assert_eq!(form.display_value(id, ParecerField::TechnicalOpinion), "ABC");
    assert!(form.has_pending_edits());

    form.blur(id, ParecerField::TechnicalOpinion, NOW + 300).unwrap();
    let entry = form.get(id).unwrap();
    assert_eq!(entry.technical_opinion, "ABC");
    assert_eq!(entry.updated_by.as_deref(), Some("Ana"));
    assert!(!form.has_pending_edits());
  }

  #[test]
  fn test_tick_commits_after_debounce() {
    let mut form = ParecerForm::new(None, NOW);
    let id = form.entries()[0].id;
    form.input(id, ParecerField::TechnicalOpinion, "ok", NOW).unwrap();

    assert_eq!(form.tick(NOW + 500), 0);
    assert_eq!(form.tick(NOW + 1_000), 1);
    assert_eq!(form.get(id).unwrap().technical_opinion, "ok");
    assert_eq!(form.tick(NOW + 3_000), 0);
  }

  #[test]
  fn test_rejected_date_keeps_previous_value() {
    let mut form = ParecerForm::new(None, NOW);
    let id = form.entries()[0].id;

    assert!(form.input(id, ParecerField::RequestDate, "19", NOW).unwrap());
    assert!(!form.input(id, ParecerField::RequestDate, "99", NOW).unwrap());
    assert!(!form.input(id, ParecerField::RequestDate, "1913", NOW).unwrap());
    assert_eq!(form.display_value(id, ParecerField::RequestDate), "19");
  }

  #[test]
  fn test_analysis_days_derived_on_commit() {
    let mut form = ParecerForm::new(None, NOW);
    let id = form.entries()[0].id;

    type_and_blur(&mut form, id, ParecerField::RequestDate, "01032024");
    assert_eq!(form.get(id).unwrap().analysis_days, None);
    assert_eq!(form.analysis_label(id), ANALYSIS_HINT);

    type_and_blur(&mut form, id, ParecerField::OpinionDate, "05032024");
    assert_eq!(form.get(id).unwrap().analysis_days, Some(4));
    assert_eq!(form.analysis_label(id), "4 dia(s)");

    // Incomplete opinion date clears the derived value
    type_and_blur(&mut form, id, ParecerField::OpinionDate, "0503202");
    assert_eq!(form.get(id).unwrap().opinion_date, "05/03/202");
    assert_eq!(form.get(id).unwrap().analysis_days, None);
  }

  #[test]
  fn test_first_registro_uses_forwarding_date() {
    let mut form = ParecerForm::new(None, NOW);
    let first = form.entries()[0].id;

    form
      .set_guide_opinion(
        first,
        Some(GuideOpinion::Favoravel),
        Some(date(20, 2, 2024)),
        date(1, 3, 2024),
        NOW,
      )
      .unwrap();
    assert_eq!(form.get(first).unwrap().request_date, "20/02/2024");
  }

  #[test]
  fn test_first_registro_falls_back_to_today() {
    let mut form = ParecerForm::new(None, NOW);
    let first = form.entries()[0].id;

    form
      .set_guide_opinion(first, Some(GuideOpinion::Inconclusivo), None, date(1, 3, 2024), NOW)
      .unwrap();
    assert_eq!(form.get(first).unwrap().request_date, "01/03/2024");
  }

  #[test]
  fn test_later_registros_ignore_forwarding_date() {
    let mut form = ParecerForm::new(None, NOW);
    let second = form.add(NOW).unwrap();

    form
      .set_guide_opinion(
        second,
        Some(GuideOpinion::Desfavoravel),
        Some(date(20, 2, 2024)),
        date(1, 3, 2024),
        NOW,
      )
      .unwrap();
    assert_eq!(form.get(second).unwrap().request_date, "01/03/2024");
  }

  #[test]
  fn test_auto_fill_keeps_existing_request_date() {
    let mut form = ParecerForm::new(None, NOW);
    let id = form.entries()[0].id;
    type_and_blur(&mut form, id, ParecerField::RequestDate, "10022024");

    form
      .set_guide_opinion(
        id,
        Some(GuideOpinion::Favoravel),
        Some(date(20, 2, 2024)),
        date(1, 3, 2024),
        NOW,
      )
      .unwrap();
    assert_eq!(form.get(id).unwrap().request_date, "10/02/2024");
  }

  #[test]
  fn test_auto_fill_updates_visible_field() {
    let mut form = ParecerForm::new(None, NOW);
    let id = form.entries()[0].id;
    // Focus the field without typing so a clean model exists
    form.blur(id, ParecerField::RequestDate, NOW).unwrap();

    form
      .set_guide_opinion(id, Some(GuideOpinion::Favoravel), None, date(1, 3, 2024), NOW)
      .unwrap();
    assert_eq!(form.display_value(id, ParecerField::RequestDate), "01/03/2024");
  }

  #[test]
  fn test_round_trip_registros() {
    let registro = ParecerRegistro {
      id: 3,
      technical_opinion: "Dentro do protocolo".to_string(),
      guide_opinion: Some(GuideOpinion::Favoravel),
      finalization: Some(Finalization::Autorizada),
      request_date: Some(date(1, 3, 2024)),
      opinion_date: Some(date(5, 3, 2024)),
      analysis_days: Some(4),
      created_by: Some("Ana".to_string()),
      updated_by: None,
      created_at: None,
      updated_at: None,
    };
    let mut form = ParecerForm::from_registros(&[registro.clone()], None, NOW);
    assert_eq!(form.get(3).unwrap().request_date, "01/03/2024");
    assert_eq!(form.to_registros(), vec![registro]);

    let next = form.add(NOW).unwrap();
    assert_eq!(next, 4);
  }

  #[test]
  fn test_oversized_server_list_is_kept() {
    let registros: Vec<ParecerRegistro> = (1..=6)
      .map(|id| ParecerRegistro {
        id,
        technical_opinion: format!("parecer {}", id),
        guide_opinion: None,
        finalization: None,
        request_date: None,
        opinion_date: None,
        analysis_days: None,
        created_by: None,
        updated_by: None,
        created_at: None,
        updated_at: None,
      })
      .collect();

    let mut form = ParecerForm::from_registros(&registros, None, NOW);
    assert_eq!(form.len(), 6);
    assert_eq!(form.to_registros(), registros);
    assert_eq!(
      form.add(NOW),
      Err(FormError::ParecerLimit { max: MAX_PARECERES })
    );
    assert_eq!(form.len(), 6);
  }

  #[test]
  fn test_flush_commits_everything() {
    let mut form = ParecerForm::new(None, NOW);
    let id = form.entries()[0].id;
    form.input(id, ParecerField::TechnicalOpinion, "texto", NOW).unwrap();
    form.input(id, ParecerField::OpinionDate, "05032024", NOW).unwrap();

    assert_eq!(form.flush(NOW), 2);
    let entry = form.get(id).unwrap();
    assert_eq!(entry.technical_opinion, "texto");
    assert_eq!(entry.opinion_date, "05/03/2024");
  }
}
