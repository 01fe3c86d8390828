use crate::api::api_types::parse_decimal;
use crate::api::types::{
  Attachment, DoseUnit, Finalization, GuideOpinion, PreviaRecord, Protocol, ProtocolDrug,
};
use crate::app::AppContext;
use crate::dose::{body_surface_area, calvert, drug_dose};
use crate::error::{FieldIssue, NetworkError, SaveError};
use crate::form::{
  pending_attachment, submit, DraftAttachment, FormDraft, HeaderField, ParecerField,
  SubmitOutcome,
};
use crate::query::{Mutation, Query, QueryState};
use crate::ui::components::{InputResult, TextInput};
use crate::ui::renderfns::{format_size, truncate};
use crate::ui::view::{Notice, ShortcutInfo, View, ViewAction};
use chrono::{Local, NaiveDate};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use std::path::PathBuf;
use tracing::debug;

/// One focusable line of the form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Row {
  Header(HeaderField),
  /// Glomerular filtration rate for AUC doses; not saved
  Gfr,
  GuideOpinion(u32),
  Finalization(u32),
  Text(u32, ParecerField),
  Attachment(usize),
  AddAttachment,
}

fn rows(draft: &FormDraft) -> Vec<Row> {
  let mut rows: Vec<Row> = HeaderField::ALL.iter().map(|f| Row::Header(*f)).collect();
  rows.push(Row::Gfr);
  for entry in draft.pareceres.entries() {
    rows.push(Row::GuideOpinion(entry.id));
    rows.push(Row::Finalization(entry.id));
    rows.push(Row::Text(entry.id, ParecerField::RequestDate));
    rows.push(Row::Text(entry.id, ParecerField::OpinionDate));
    rows.push(Row::Text(entry.id, ParecerField::TechnicalOpinion));
  }
  rows.extend((0..draft.attachments.len()).map(Row::Attachment));
  rows.push(Row::AddAttachment);
  rows
}

/// Step through `None` followed by every option, wrapping around.
fn cycle<T: Copy + PartialEq>(options: &[T], current: Option<T>, forward: bool) -> Option<T> {
  let mut all: Vec<Option<T>> = vec![None];
  all.extend(options.iter().copied().map(Some));
  let idx = all.iter().position(|o| *o == current).unwrap_or(0);
  let next = if forward {
    (idx + 1) % all.len()
  } else {
    (idx + all.len() - 1) % all.len()
  };
  all[next]
}

/// "Nova Prévia" editor, for a new draft or a saved record
pub struct PreviaFormView {
  ctx: AppContext,
  patient_id: u64,
  patient_name: String,
  /// `None` while the record being edited is still loading
  draft: Option<FormDraft>,
  /// Set on the first edit; from then on revalidated data never replaces the draft
  touched: bool,
  record: Option<Query<PreviaRecord>>,
  stored_attachments: Option<Query<Vec<Attachment>>>,
  protocols: Query<Vec<Protocol>>,
  focus: usize,
  gfr: String,
  issues: Vec<FieldIssue>,
  path_prompt: Option<TextInput>,
  saving: Mutation<SubmitOutcome, SaveError>,
  picking: Mutation<DraftAttachment, String>,
  deleting: Mutation<u64, NetworkError>,
  notice: Option<Notice>,
}

impl PreviaFormView {
  fn base(ctx: AppContext, patient_id: u64, patient_name: String) -> Self {
    let service = ctx.service.clone();
    let mut protocols = Query::new(move || {
      let service = service.clone();
      async move { service.list_protocols().await }
    });
    protocols.fetch();

    Self {
      ctx,
      patient_id,
      patient_name,
      draft: None,
      touched: false,
      record: None,
      stored_attachments: None,
      protocols,
      focus: 0,
      gfr: String::new(),
      issues: Vec::new(),
      path_prompt: None,
      saving: Mutation::new(),
      picking: Mutation::new(),
      deleting: Mutation::new(),
      notice: None,
    }
  }

  pub fn new_draft(ctx: AppContext, patient_id: u64, patient_name: String) -> Self {
    let mut view = Self::base(ctx, patient_id, patient_name);
    let now = view.now();
    view.draft = Some(FormDraft::new(
      patient_id,
      view.ctx.clinic.clone(),
      view.ctx.user.clone(),
      now,
    ));
    view
  }

  pub fn edit(ctx: AppContext, patient_id: u64, patient_name: String, previa_id: u64) -> Self {
    let mut view = Self::base(ctx, patient_id, patient_name);

    let service = view.ctx.service.clone();
    let mut record = Query::new(move || {
      let service = service.clone();
      async move { service.get_previa(previa_id).await }
    });
    record.fetch();

    let service = view.ctx.service.clone();
    let mut attachments = Query::new(move || {
      let service = service.clone();
      async move { service.list_attachments(previa_id).await }
    });
    attachments.fetch();

    view.record = Some(record);
    view.stored_attachments = Some(attachments);
    view
  }

  fn now(&self) -> i64 {
    self.ctx.service.cache().now_ms()
  }

  fn today() -> NaiveDate {
    Local::now().date_naive()
  }

  fn current_row(&self) -> Option<Row> {
    let draft = self.draft.as_ref()?;
    rows(draft).get(self.focus).copied()
  }

  fn matched_protocol(&self) -> Option<&Protocol> {
    let name = self.draft.as_ref()?.protocol.trim().to_lowercase();
    if name.is_empty() {
      return None;
    }
    self
      .protocols
      .data()?
      .iter()
      .find(|p| p.name.trim().to_lowercase() == name)
  }

  // Loading

  /// Build the draft once the record and its attachments arrived, and rebuild
  /// it from revalidated data as long as the user has not edited anything.
  fn poll_record(&mut self) {
    let mut changed = false;
    if let Some(query) = self.record.as_mut() {
      changed |= query.poll();
    }
    if let Some(query) = self.stored_attachments.as_mut() {
      changed |= query.poll();
    }
    if !changed || self.touched {
      return;
    }

    let Some(record) = self.record.as_ref().and_then(|q| q.data()).cloned() else {
      return;
    };
    // The form still opens when only the attachment list failed
    let attachments = match self.stored_attachments.as_ref().map(|q| q.state()) {
      Some(QueryState::Success(list)) => list.clone(),
      Some(QueryState::Error(_)) | None => Vec::new(),
      Some(_) => return,
    };
    if record.patient_id != self.patient_id {
      debug!(previa_id = record.id, "record belongs to another patient, ignoring");
      return;
    }

    let now = self.now();
    let draft = FormDraft::from_record(&record, attachments, self.ctx.user.clone(), now);
    self.focus = self.focus.min(rows(&draft).len().saturating_sub(1));
    self.draft = Some(draft);
  }

  fn poll_mutations(&mut self) {
    if let Some(result) = self.saving.poll() {
      self.finish_save(result);
    }

    match self.picking.poll() {
      Some(Ok(attachment)) => {
        if let Some(draft) = self.draft.as_mut() {
          draft.add_attachment(attachment);
          self.touched = true;
        }
      }
      Some(Err(e)) => self.notice = Some(Notice::error(e)),
      None => {}
    }

    match self.deleting.poll() {
      Some(Ok(attachment_id)) => {
        if let Some(draft) = self.draft.as_mut() {
          let idx = draft.attachments.iter().position(
            |a| matches!(a, DraftAttachment::Stored(stored) if stored.id == attachment_id),
          );
          if let Some(idx) = idx {
            draft.remove_attachment(idx);
          }
        }
        self.notice = Some(Notice::info("Anexo removido"));
      }
      Some(Err(e)) => {
        self.notice = Some(Notice::error(format!("Falha ao remover anexo: {}", e)));
      }
      None => {}
    }
  }

  // Saving

  fn save(&mut self) {
    if self.saving.is_pending() {
      self.notice = Some(Notice::info("Salvamento em andamento..."));
      return;
    }
    let now = self.now();
    let Some(draft) = self.draft.as_mut() else {
      return;
    };

    match draft.prepare(now) {
      Err(e) => {
        self.notice = Some(Notice::error(e.to_string()));
        self.issues = e.issues;
      }
      Ok(plan) => {
        self.issues.clear();
        let service = self.ctx.service.clone();
        self.saving.start(async move { submit(&service, plan).await });
      }
    }
  }

  fn finish_save(&mut self, result: Result<SubmitOutcome, SaveError>) {
    match result {
      Ok(SubmitOutcome::Saved(report)) => {
        let Some(draft) = self.draft.as_mut() else {
          return;
        };
        if !draft.apply_report(&report) {
          debug!(previa_id = report.record.id, "save result is for another record, discarding");
          return;
        }
        self.notice = Some(if report.failed.is_empty() {
          Notice::info(format!("Prévia {} salva", report.record.id))
        } else {
          let names: Vec<&str> = report.failed.iter().map(|f| f.name.as_str()).collect();
          Notice::error(format!(
            "Prévia {} salva, mas falhou o envio de: {}",
            report.record.id,
            names.join(", ")
          ))
        });
      }
      Ok(SubmitOutcome::AlreadyPending) => {
        self.notice = Some(Notice::info("Esta prévia já está sendo salva"));
      }
      Err(SaveError::Validation(e)) => {
        self.notice = Some(Notice::error(e.to_string()));
        self.issues = e.issues;
      }
      Err(e) => {
        self.notice = Some(Notice::error(format!("Falha ao salvar: {}", e)));
      }
    }
  }

  // Editing

  fn move_focus(&mut self, forward: bool) {
    let Some(len) = self.draft.as_ref().map(|d| rows(d).len()) else {
      return;
    };
    self.leave_row();
    self.focus = if forward {
      (self.focus + 1) % len
    } else {
      (self.focus + len - 1) % len
    };
  }

  /// Commit the field being left, and fill protocol defaults when leaving the protocol.
  fn leave_row(&mut self) {
    let now = self.now();
    let row = self.current_row();
    let defaults = self.matched_protocol().map(|p| (p.cid.clone(), p.cycles));
    let Some(draft) = self.draft.as_mut() else {
      return;
    };

    match row {
      Some(Row::Text(id, field)) => {
        if let Err(e) = draft.pareceres.blur(id, field, now) {
          debug!(error = %e, "blur on removed parecer");
        }
      }
      Some(Row::Header(HeaderField::Protocol)) => {
        if let Some((cid, cycles)) = defaults {
          if draft.cid.is_empty() {
            draft.cid = cid.unwrap_or_default();
          }
          if draft.planned_cycles.is_empty() {
            draft.planned_cycles = cycles.map(|c| c.to_string()).unwrap_or_default();
          }
        }
      }
      _ => {}
    }
  }

  fn add_parecer(&mut self) {
    let now = self.now();
    let Some(draft) = self.draft.as_mut() else {
      return;
    };
    match draft.pareceres.add(now) {
      Ok(id) => {
        self.touched = true;
        self.leave_row();
        if let Some(pos) = self
          .draft
          .as_ref()
          .and_then(|d| rows(d).iter().position(|r| *r == Row::GuideOpinion(id)))
        {
          self.focus = pos;
        }
      }
      Err(e) => self.notice = Some(Notice::error(e.to_string())),
    }
  }

  fn remove_parecer(&mut self) {
    let id = match self.current_row() {
      Some(Row::GuideOpinion(id)) | Some(Row::Finalization(id)) | Some(Row::Text(id, _)) => id,
      _ => {
        self.notice = Some(Notice::info("Posicione o cursor em um parecer para removê-lo"));
        return;
      }
    };
    let Some(draft) = self.draft.as_mut() else {
      return;
    };
    match draft.pareceres.remove(id) {
      Ok(()) => {
        self.touched = true;
        let len = rows(draft).len();
        self.focus = self.focus.min(len.saturating_sub(1));
      }
      Err(e) => self.notice = Some(Notice::error(e.to_string())),
    }
  }

  fn remove_attachment(&mut self, idx: usize) {
    let Some(draft) = self.draft.as_mut() else {
      return;
    };
    // Some(id) for a stored attachment, None for a pending one
    let stored_id = match draft.attachments.get(idx) {
      Some(DraftAttachment::Stored(stored)) => Some(stored.id),
      Some(DraftAttachment::Pending { .. }) => None,
      None => return,
    };

    match (stored_id, draft.previa_id) {
      (Some(attachment_id), Some(previa_id)) => {
        let service = self.ctx.service.clone();
        let started = self.deleting.start(async move {
          service
            .delete_attachment(previa_id, attachment_id)
            .await
            .map(|()| attachment_id)
        });
        if !started {
          self.notice = Some(Notice::info("Aguarde a remoção anterior"));
        }
      }
      (Some(_), None) => {}
      (None, _) => {
        draft.remove_attachment(idx);
        self.touched = true;
      }
    }
  }

  fn pick_file(&mut self, raw: &str) {
    let raw = raw.trim();
    if raw.is_empty() {
      return;
    }
    let path = match raw.strip_prefix("~/").zip(dirs::home_dir()) {
      Some((rest, home)) => home.join(rest),
      None => PathBuf::from(raw),
    };
    let started = self.picking.start(async move {
      pending_attachment(&path)
        .await
        .map_err(|e| format!("{}: {}", path.display(), e))
    });
    if !started {
      self.notice = Some(Notice::info("Aguarde o arquivo anterior"));
    }
  }

  fn handle_prompt(&mut self, key: KeyEvent) -> Option<ViewAction> {
    let prompt = self.path_prompt.as_mut()?;
    match prompt.handle_key(key) {
      InputResult::Submitted(path) => {
        self.path_prompt = None;
        self.pick_file(&path);
      }
      InputResult::Cancelled => self.path_prompt = None,
      InputResult::Consumed | InputResult::NotHandled => {}
    }
    Some(ViewAction::None)
  }

  fn edit_focused(&mut self, key: KeyEvent) {
    let Some(row) = self.current_row() else {
      return;
    };
    let now = self.now();
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match (row, key.code) {
      (Row::Attachment(idx), KeyCode::Delete | KeyCode::Backspace) => self.remove_attachment(idx),
      (Row::AddAttachment, KeyCode::Enter) => self.path_prompt = Some(TextInput::new()),
      (_, KeyCode::Enter) => self.move_focus(true),
      (Row::Gfr, KeyCode::Char(c)) if !ctrl && (c.is_ascii_digit() || c == ',' || c == '.') => {
        self.gfr.push(c);
      }
      (Row::Gfr, KeyCode::Backspace) => {
        self.gfr.pop();
      }
      (Row::GuideOpinion(id), KeyCode::Left | KeyCode::Right | KeyCode::Char(' ')) => {
        let forward = key.code != KeyCode::Left;
        let Some(draft) = self.draft.as_mut() else {
          return;
        };
        let current = draft.pareceres.get(id).and_then(|e| e.guide_opinion);
        let next = cycle(&GuideOpinion::ALL, current, forward);
        let forwarding = draft.forwarding_date();
        if draft
          .pareceres
          .set_guide_opinion(id, next, forwarding, Self::today(), now)
          .is_ok()
        {
          self.touched = true;
        }
      }
      (Row::Finalization(id), KeyCode::Left | KeyCode::Right | KeyCode::Char(' ')) => {
        let forward = key.code != KeyCode::Left;
        let Some(draft) = self.draft.as_mut() else {
          return;
        };
        let current = draft.pareceres.get(id).and_then(|e| e.finalization);
        let next = cycle(&Finalization::ALL, current, forward);
        if draft.pareceres.set_finalization(id, next, now).is_ok() {
          self.touched = true;
        }
      }
      (Row::Header(field), KeyCode::Char(c)) if !ctrl => {
        let Some(draft) = self.draft.as_mut() else {
          return;
        };
        let raw = format!("{}{}", draft.header(field), c);
        self.touched |= draft.set_header(field, &raw);
      }
      (Row::Header(field), KeyCode::Backspace) => {
        let Some(draft) = self.draft.as_mut() else {
          return;
        };
        let mut raw = draft.header(field).to_string();
        raw.pop();
        self.touched |= draft.set_header(field, &raw);
      }
      (Row::Text(id, field), KeyCode::Char(c)) if !ctrl => {
        let Some(draft) = self.draft.as_mut() else {
          return;
        };
        let raw = format!("{}{}", draft.pareceres.display_value(id, field), c);
        self.touched |= draft.pareceres.input(id, field, &raw, now).unwrap_or(false);
      }
      (Row::Text(id, field), KeyCode::Backspace) => {
        let Some(draft) = self.draft.as_mut() else {
          return;
        };
        let mut raw = draft.pareceres.display_value(id, field).to_string();
        raw.pop();
        self.touched |= draft.pareceres.input(id, field, &raw, now).unwrap_or(false);
      }
      _ => {}
    }
  }

  // Rendering

  fn has_issue(&self, row: Row) -> bool {
    match row {
      Row::Header(field) => self.issues.iter().any(|i| i.field == field.issue_key()),
      Row::Text(id, field) => self.issues.iter().any(|i| i.field == field.issue_key(id)),
      _ => false,
    }
  }

  fn row_line(&self, draft: &FormDraft, row: Row, focused: bool) -> Line<'static> {
    let (label, value): (String, String) = match row {
      Row::Header(field) => (field.label().to_string(), draft.header(field).to_string()),
      Row::Gfr => ("TFG (mL/min)".to_string(), self.gfr.clone()),
      Row::GuideOpinion(id) => (
        "Parecer guia".to_string(),
        draft
          .pareceres
          .get(id)
          .and_then(|e| e.guide_opinion)
          .map(|o| o.to_string())
          .unwrap_or_else(|| "-".to_string()),
      ),
      Row::Finalization(id) => (
        "Finalização".to_string(),
        draft
          .pareceres
          .get(id)
          .and_then(|e| e.finalization)
          .map(|f| f.to_string())
          .unwrap_or_else(|| "-".to_string()),
      ),
      Row::Text(id, field) => (
        field.label().to_string(),
        draft.pareceres.display_value(id, field).to_string(),
      ),
      Row::Attachment(idx) => match draft.attachments.get(idx) {
        Some(a) => (
          format!("Anexo {}", idx + 1),
          format!(
            "{} ({}){}",
            truncate(a.name(), 40),
            format_size(a.size()),
            if a.is_pending() { " pendente" } else { "" }
          ),
        ),
        None => (String::new(), String::new()),
      },
      Row::AddAttachment => (String::new(), "+ adicionar anexo (Enter)".to_string()),
    };

    let label_style = if self.has_issue(row) {
      Style::default().fg(Color::Red).bold()
    } else {
      Style::default().fg(Color::Gray)
    };
    let value_style = if focused {
      Style::default().fg(Color::White).bg(Color::DarkGray)
    } else {
      Style::default().fg(Color::White)
    };
    let selector = matches!(row, Row::GuideOpinion(_) | Row::Finalization(_));

    let mut spans = vec![
      Span::styled(
        if focused { "> " } else { "  " },
        Style::default().fg(Color::Yellow),
      ),
      Span::styled(format!("{:<22}", label), label_style),
      Span::styled(value, value_style),
    ];
    if focused && selector {
      spans.push(Span::styled("  ◀ ▶", Style::default().fg(Color::DarkGray)));
    } else if focused && !matches!(row, Row::Attachment(_) | Row::AddAttachment) {
      spans.push(Span::styled("_", Style::default().fg(Color::Yellow)));
    }
    Line::from(spans)
  }

  fn render_form(&self, frame: &mut Frame, area: Rect, draft: &FormDraft) {
    let title = match draft.previa_id {
      Some(id) => format!(" Prévia {} · {} ", id, self.patient_name),
      None => format!(" Nova prévia · {} ", self.patient_name),
    };
    let title = if self.saving.is_pending() {
      format!("{}(salvando...) ", title)
    } else {
      title
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    let heading = |text: String| {
      Line::styled(
        format!("── {} ──", text),
        Style::default().fg(Color::Cyan).bold(),
      )
    };
    let dim = Style::default().fg(Color::DarkGray);

    let rows = rows(draft);
    let parecer_count = draft.pareceres.len();
    let mut lines: Vec<Line> = Vec::new();
    let mut focus_line = 0;
    let mut attachments_heading = false;

    for (i, row) in rows.iter().enumerate() {
      match row {
        Row::GuideOpinion(id) => {
          let n = draft
            .pareceres
            .entries()
            .iter()
            .position(|e| e.id == *id)
            .unwrap_or(0);
          lines.push(Line::raw(""));
          lines.push(heading(format!("Parecer {} de {}", n + 1, parecer_count)));
        }
        Row::Attachment(_) | Row::AddAttachment if !attachments_heading => {
          attachments_heading = true;
          lines.push(Line::raw(""));
          lines.push(heading("Anexos".to_string()));
        }
        _ => {}
      }

      if i == self.focus {
        focus_line = lines.len();
      }
      lines.push(self.row_line(draft, *row, i == self.focus));

      if let Row::Text(id, ParecerField::TechnicalOpinion) = row {
        lines.push(Line::styled(
          format!("  {:<22}{}", "Tempo de análise", draft.pareceres.analysis_label(*id)),
          dim,
        ));
        if let Some(entry) = draft.pareceres.get(*id) {
          let by = entry
            .updated_by
            .as_deref()
            .or(entry.created_by.as_deref())
            .unwrap_or("-");
          let at = entry
            .updated_at
            .or(entry.created_at)
            .map(|t| t.with_timezone(&Local).format("%d/%m/%Y %H:%M").to_string())
            .unwrap_or_default();
          lines.push(Line::styled(format!("  {:<22}{} {}", "Última edição", by, at), dim));
        }
      }
    }

    let inner_height = area.height.saturating_sub(2) as usize;
    let scroll = focus_line.saturating_sub(inner_height.saturating_sub(2));

    let paragraph = Paragraph::new(lines)
      .block(block)
      .scroll((scroll as u16, 0));
    frame.render_widget(paragraph, area);
  }

  fn render_dose_panel(&self, frame: &mut Frame, area: Rect, draft: &FormDraft) {
    let block = Block::default()
      .title(" Doses ")
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::DarkGray));

    let weight = draft.weight_kg();
    let height = draft.height_cm();
    let gfr = parse_decimal(&self.gfr);

    let mut lines = vec![match weight.zip(height).and_then(|(w, h)| body_surface_area(w, h)) {
      Some(bsa) => Line::from(vec![
        Span::styled("SC (Mosteller): ", Style::default().fg(Color::Gray)),
        Span::styled(format!("{} m²", br_number(bsa)), Style::default().fg(Color::Green)),
      ]),
      None => Line::styled("SC: informe peso e altura", Style::default().fg(Color::DarkGray)),
    }];
    lines.push(Line::raw(""));

    match self.matched_protocol() {
      Some(protocol) => {
        lines.push(Line::styled(
          protocol.name.clone(),
          Style::default().fg(Color::Yellow).bold(),
        ));
        for drug in &protocol.drugs {
          lines.push(Line::from(vec![
            Span::raw(format!("{} ", truncate(&drug.name, 18))),
            Span::styled(
              drug_dose_label(drug, weight, height, gfr),
              Style::default().fg(Color::Cyan),
            ),
          ]));
        }
      }
      None if self.protocols.is_loading() => {
        lines.push(Line::styled("carregando protocolos...", Style::default().fg(Color::DarkGray)));
      }
      None => {
        lines.push(Line::styled(
          "Protocolo não cadastrado",
          Style::default().fg(Color::DarkGray),
        ));
      }
    }

    frame.render_widget(
      Paragraph::new(lines).block(block).wrap(Wrap { trim: true }),
      area,
    );
  }

  fn render_prompt(&self, frame: &mut Frame, area: Rect) {
    let Some(prompt) = self.path_prompt.as_ref() else {
      return;
    };
    let width = area.width.saturating_sub(4).max(10);
    let prompt_area = Rect::new(area.x + 2, area.y + area.height.saturating_sub(4), width, 3);

    frame.render_widget(Clear, prompt_area);
    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow))
      .title(" Caminho do arquivo ");
    let line = Line::from(vec![
      Span::raw(prompt.value().to_string()),
      Span::styled("_", Style::default().fg(Color::Yellow)),
    ]);
    frame.render_widget(Paragraph::new(line).block(block), prompt_area);
  }
}

fn br_number(v: f64) -> String {
  format!("{:.2}", v).replace('.', ",")
}

fn unit_label(unit: DoseUnit) -> &'static str {
  match unit {
    DoseUnit::MgPerM2 => "mg/m²",
    DoseUnit::MgPerKg => "mg/kg",
    DoseUnit::Auc => "AUC",
    DoseUnit::Fixed => "mg",
  }
}

/// Prescribed dose and the resulting mg for the patient, or what is missing.
fn drug_dose_label(
  drug: &ProtocolDrug,
  weight_kg: Option<f64>,
  height_cm: Option<f64>,
  gfr: Option<f64>,
) -> String {
  let prescribed = format!("{} {}", br_number(drug.dose), unit_label(drug.unit));
  let mg = match drug.unit {
    DoseUnit::Auc => gfr.and_then(|g| calvert(drug.dose, g)),
    _ => drug_dose(drug, weight_kg, height_cm),
  };
  match (mg, drug.unit) {
    (Some(mg), DoseUnit::Fixed) => format!("{} mg", br_number(mg)),
    (Some(mg), _) => format!("{} → {} mg", prescribed, br_number(mg)),
    (None, DoseUnit::Auc) => format!("{} (informe TFG)", prescribed),
    (None, _) => format!("{} (informe peso/altura)", prescribed),
  }
}

impl View for PreviaFormView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    if let Some(action) = self.handle_prompt(key) {
      return action;
    }

    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
      KeyCode::Esc => return ViewAction::Pop,
      KeyCode::Char('s') if ctrl => self.save(),
      KeyCode::Char('n') if ctrl => self.add_parecer(),
      KeyCode::Char('d') if ctrl => self.remove_parecer(),
      KeyCode::Up | KeyCode::BackTab => self.move_focus(false),
      KeyCode::Down | KeyCode::Tab => self.move_focus(true),
      _ => self.edit_focused(key),
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let Some(draft) = self.draft.as_ref() else {
      let (text, color) = match self.record.as_ref().map(|q| q.state()) {
        Some(QueryState::Error(e)) => (format!("Falha ao carregar a prévia: {}", e), Color::Red),
        _ => ("Carregando prévia...".to_string(), Color::DarkGray),
      };
      let block = Block::default()
        .title(format!(" Prévia · {} ", self.patient_name))
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
      frame.render_widget(
        Paragraph::new(text).block(block).style(Style::default().fg(color)),
        area,
      );
      return;
    };

    let chunks = Layout::default()
      .direction(Direction::Horizontal)
      .constraints([Constraint::Min(50), Constraint::Length(44)])
      .split(area);

    self.render_form(frame, chunks[0], draft);
    self.render_dose_panel(frame, chunks[1], draft);
    self.render_prompt(frame, chunks[0]);
  }

  fn breadcrumb_label(&self) -> String {
    match self.draft.as_ref().and_then(|d| d.previa_id) {
      Some(id) => format!("Prévia {}", id),
      None if self.record.is_some() => "Prévia".to_string(),
      None => "Nova prévia".to_string(),
    }
  }

  fn patient(&self) -> Option<(u64, String)> {
    Some((self.patient_id, self.patient_name.clone()))
  }

  fn tick(&mut self) {
    self.poll_record();
    self.protocols.poll();
    self.poll_mutations();

    let now = self.now();
    if let Some(draft) = self.draft.as_mut() {
      draft.pareceres.tick(now);
    }
  }

  fn reload(&mut self) {
    self.protocols.refetch();
    if !self.touched {
      if let Some(query) = self.record.as_mut() {
        query.refetch();
      }
      if let Some(query) = self.stored_attachments.as_mut() {
        query.refetch();
      }
    }
  }

  fn captures_input(&self) -> bool {
    true
  }

  fn take_notice(&mut self) -> Option<Notice> {
    if let Some(notice) = self.notice.take() {
      return Some(notice);
    }
    let revalidation = self
      .record
      .as_mut()
      .and_then(|q| q.take_notice())
      .or_else(|| self.protocols.take_notice());
    revalidation.map(Notice::error)
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new("ctrl-s", "salvar").with_priority(10),
      ShortcutInfo::new("ctrl-n", "novo parecer").with_priority(20),
      ShortcutInfo::new("ctrl-d", "remover parecer").with_priority(30),
      ShortcutInfo::new("tab/↑↓", "campo").with_priority(40),
      ShortcutInfo::new("esc", "voltar").with_priority(50),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn drug(unit: DoseUnit, dose: f64) -> ProtocolDrug {
    ProtocolDrug {
      name: "Droga".to_string(),
      dose,
      unit,
    }
  }

  #[test]
  fn test_cycle_wraps_through_none() {
    let opts = [Finalization::Pendente, Finalization::Autorizada];
    assert_eq!(cycle(&opts, None, true), Some(Finalization::Pendente));
    assert_eq!(
      cycle(&opts, Some(Finalization::Pendente), true),
      Some(Finalization::Autorizada)
    );
    assert_eq!(cycle(&opts, Some(Finalization::Autorizada), true), None);
    assert_eq!(cycle(&opts, None, false), Some(Finalization::Autorizada));
  }

  #[test]
  fn test_rows_follow_draft() {
    let mut draft = FormDraft::new(42, None, None, 0);
    let base = rows(&draft).len();
    assert_eq!(base, HeaderField::ALL.len() + 1 + 5 + 1);

    let id = draft.pareceres.add(0).unwrap();
    let rows = rows(&draft);
    assert_eq!(rows.len(), base + 5);
    assert!(rows.contains(&Row::GuideOpinion(id)));
    assert_eq!(rows.last(), Some(&Row::AddAttachment));
  }

  #[test]
  fn test_drug_dose_label() {
    // BSA for 70 kg / 170 cm is 1,82 m²
    assert_eq!(
      drug_dose_label(&drug(DoseUnit::MgPerM2, 100.0), Some(70.0), Some(170.0), None),
      "100,00 mg/m² → 182,00 mg"
    );
    assert_eq!(
      drug_dose_label(&drug(DoseUnit::MgPerM2, 100.0), None, Some(170.0), None),
      "100,00 mg/m² (informe peso/altura)"
    );
    assert_eq!(
      drug_dose_label(&drug(DoseUnit::Auc, 5.0), None, None, Some(60.0)),
      "5,00 AUC → 425,00 mg"
    );
    assert_eq!(
      drug_dose_label(&drug(DoseUnit::Auc, 5.0), None, None, None),
      "5,00 AUC (informe TFG)"
    );
    assert_eq!(
      drug_dose_label(&drug(DoseUnit::Fixed, 8.0), None, None, None),
      "8,00 mg"
    );
  }
}
