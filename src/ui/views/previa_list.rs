use crate::api::types::{CycleEntry, PreviaRecord};
use crate::app::AppContext;
use crate::form::mask::format_br_date;
use crate::query::{Query, QueryState};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{finalization_color, truncate};
use crate::ui::view::{Notice, ShortcutInfo, View, ViewAction};
use crate::ui::views::PreviaFormView;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};

/// Consultation history of one patient
pub struct PreviaListView {
  ctx: AppContext,
  patient_id: u64,
  patient_name: String,
  query: Query<Vec<PreviaRecord>>,
  list_state: ListState,
  /// Cycles of the selected prévia, with the id they belong to
  cycles: Option<(u64, Query<Vec<CycleEntry>>)>,
}

impl PreviaListView {
  pub fn new(ctx: AppContext, patient_id: u64, patient_name: String) -> Self {
    let service = ctx.service.clone();
    let mut query = Query::new(move || {
      let service = service.clone();
      async move { service.list_previas(patient_id).await }
    });
    query.fetch();

    Self {
      ctx,
      patient_id,
      patient_name,
      query,
      list_state: ListState::default(),
      cycles: None,
    }
  }

  fn previas(&self) -> Vec<&PreviaRecord> {
    let all = self.query.data().map(|v| v.as_slice()).unwrap_or(&[]);
    most_recent(all, self.ctx.service.cache().record_limit())
  }

  fn selected(&self) -> Option<&PreviaRecord> {
    let idx = self.list_state.selected()?;
    self.previas().get(idx).copied()
  }

  /// Point the cycles query at the selected prévia. The query for a previous
  /// selection is dropped, so its late result never shows up here.
  fn sync_cycles(&mut self) {
    let selected = self.selected().map(|p| p.id);
    if self.cycles.as_ref().map(|(id, _)| *id) == selected {
      return;
    }
    self.cycles = selected.map(|previa_id| {
      let service = self.ctx.service.clone();
      let mut query = Query::new(move || {
        let service = service.clone();
        async move { service.list_cycles(previa_id).await }
      });
      query.fetch();
      (previa_id, query)
    });
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let total = self.query.data().map(|v| v.len()).unwrap_or(0);
    let len = self.previas().len();
    ensure_valid_selection(&mut self.list_state, len);

    let shown = if total > len {
      format!("{} de {}", len, total)
    } else {
      len.to_string()
    };
    let title = match self.query.state() {
      QueryState::Loading => format!(" Prévias de {} (carregando...) ", self.patient_name),
      QueryState::Error(e) => format!(" Prévias de {} (erro: {}) ", self.patient_name, e),
      _ => format!(
        " Prévias de {} ({}){} ",
        self.patient_name,
        shown,
        super::source_suffix(&self.query)
      ),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 && !self.query.is_loading() {
      let content = if self.query.error().is_some() {
        "Falha ao carregar o histórico. Pressione 'r' para tentar de novo."
      } else {
        "Nenhuma prévia registrada. Pressione 'n' para criar."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .previas()
      .iter()
      .map(|previa| {
        let status = previa.current_status();
        let status_label = status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        let line = Line::from(vec![
          Span::styled(
            format!("{:<7}", previa.id),
            Style::default().fg(Color::Cyan),
          ),
          Span::raw(format!("{:<12}", format_br_date(previa.request_date))),
          Span::raw(format!("{:<14}", truncate(&previa.guia, 13))),
          Span::raw(format!("{:<28}", truncate(&previa.protocol, 27))),
          Span::styled(
            format!("{:<7}", previa.cid),
            Style::default().fg(Color::Yellow),
          ),
          Span::styled(
            format!("{:<24}", truncate(&status_label, 23)),
            Style::default().fg(finalization_color(status)),
          ),
          Span::styled(
            format!("{} parecer(es)", previa.pareceres.len()),
            Style::default().fg(Color::DarkGray),
          ),
        ]);
        ListItem::new(line)
      })
      .collect();

    let list = List::new(items)
      .block(block)
      .highlight_style(
        Style::default()
          .bg(Color::DarkGray)
          .add_modifier(Modifier::BOLD),
      )
      .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut self.list_state);
  }

  fn render_details(&self, frame: &mut Frame, area: Rect) {
    let block = Block::default()
      .title(" Ciclos ")
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::DarkGray));

    let lines: Vec<Line> = match self.cycles.as_ref().map(|(_, q)| q.state()) {
      None => vec![],
      Some(QueryState::Idle) | Some(QueryState::Loading) => {
        vec![Line::styled("carregando...", Style::default().fg(Color::DarkGray))]
      }
      Some(QueryState::Error(e)) => {
        vec![Line::styled(format!("erro: {}", e), Style::default().fg(Color::Red))]
      }
      Some(QueryState::Success(cycles)) if cycles.is_empty() => {
        vec![Line::styled(
          "Nenhum ciclo agendado.",
          Style::default().fg(Color::DarkGray),
        )]
      }
      Some(QueryState::Success(cycles)) => cycles
        .iter()
        .map(|c| {
          Line::from(vec![
            Span::styled(
              format!("C{} D{:<4}", c.cycle, c.day),
              Style::default().fg(Color::Cyan),
            ),
            Span::raw(format!("{:<12}", format_br_date(c.date))),
            Span::styled(
              c.status.clone().unwrap_or_default(),
              Style::default().fg(Color::DarkGray),
            ),
          ])
        })
        .collect(),
    };

    frame.render_widget(
      Paragraph::new(lines).block(block).wrap(Wrap { trim: true }),
      area,
    );
  }

  fn open_form(&self, previa_id: Option<u64>) -> ViewAction {
    let ctx = self.ctx.clone();
    let name = self.patient_name.clone();
    let view = match previa_id {
      Some(id) => PreviaFormView::edit(ctx, self.patient_id, name, id),
      None => PreviaFormView::new_draft(ctx, self.patient_id, name),
    };
    ViewAction::Push(Box::new(view))
  }
}

/// The `limit` most recent prévias: latest request date first, then highest id.
fn most_recent(previas: &[PreviaRecord], limit: usize) -> Vec<&PreviaRecord> {
  let mut sorted: Vec<&PreviaRecord> = previas.iter().collect();
  sorted.sort_by(|a, b| {
    b.request_date
      .cmp(&a.request_date)
      .then_with(|| b.id.cmp(&a.id))
  });
  sorted.truncate(limit);
  sorted
}

impl View for PreviaListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('n') => return self.open_form(None),
      KeyCode::Enter => {
        if let Some(previa) = self.selected() {
          return self.open_form(Some(previa.id));
        }
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([Constraint::Min(5), Constraint::Length(8)])
      .split(area);

    self.render_list(frame, chunks[0]);
    self.sync_cycles();
    self.render_details(frame, chunks[1]);
  }

  fn breadcrumb_label(&self) -> String {
    format!("Prévias [{}]", self.patient_name)
  }

  fn patient(&self) -> Option<(u64, String)> {
    Some((self.patient_id, self.patient_name.clone()))
  }

  fn tick(&mut self) {
    self.query.poll();
    if let Some((_, cycles)) = self.cycles.as_mut() {
      cycles.poll();
    }
  }

  fn on_resume(&mut self) {
    // A save in the form above invalidated this list
    self.query.refetch();
  }

  fn reload(&mut self) {
    self.query.refetch();
    self.cycles = None;
  }

  fn take_notice(&mut self) -> Option<Notice> {
    self.query.take_notice().map(Notice::error)
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "comando").with_priority(10),
      ShortcutInfo::new("enter", "abrir").with_priority(20),
      ShortcutInfo::new("n", "nova").with_priority(30),
      ShortcutInfo::new("r", "atualizar").with_priority(40),
      ShortcutInfo::new("q", "voltar").with_priority(50),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn previa(id: u64, request: Option<(i32, u32, u32)>) -> PreviaRecord {
    PreviaRecord {
      id,
      patient_id: 42,
      guia: format!("G{}", id),
      protocol: "Protocolo A".to_string(),
      cid: "C509".to_string(),
      clinic: "Clínica Central".to_string(),
      planned_cycles: None,
      emission_date: None,
      forwarding_date: None,
      request_date: request.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
      weight_kg: None,
      height_cm: None,
      pareceres: vec![],
    }
  }

  #[test]
  fn test_most_recent_orders_and_limits() {
    let previas = vec![
      previa(1, Some((2024, 1, 10))),
      previa(2, None),
      previa(3, Some((2024, 3, 1))),
      previa(4, Some((2024, 3, 1))),
      previa(5, Some((2023, 12, 31))),
    ];

    let ids: Vec<u64> = most_recent(&previas, 10).iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![4, 3, 1, 5, 2]);

    let ids: Vec<u64> = most_recent(&previas, 2).iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![4, 3]);
  }
}
