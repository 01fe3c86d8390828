use crate::api::types::Patient;
use crate::app::AppContext;
use crate::query::{Query, QueryState};
use crate::ui::components::{SearchEvent, SearchInput};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::truncate;
use crate::ui::view::{Notice, ShortcutInfo, View, ViewAction};
use crate::ui::views::{PreviaFormView, PreviaListView};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

/// View for picking a patient
pub struct PatientListView {
  ctx: AppContext,
  /// Server-side search behind the current query
  search_term: String,
  /// Local filter typed in the search overlay
  filter: String,
  query: Query<Vec<Patient>>,
  list_state: ListState,
  search: SearchInput,
}

impl PatientListView {
  pub fn new(ctx: AppContext) -> Self {
    let mut query = patients_query(&ctx, String::new());
    query.fetch();

    Self {
      ctx,
      search_term: String::new(),
      filter: String::new(),
      query,
      list_state: ListState::default(),
      search: SearchInput::new(),
    }
  }

  fn search_server(&mut self, term: String) {
    if term == self.search_term {
      return;
    }
    self.query = patients_query(&self.ctx, term.clone());
    self.query.fetch();
    self.search_term = term;
    self.list_state.select(None);
  }

  fn patients(&self) -> Vec<&Patient> {
    let all = self.query.data().map(|v| v.as_slice()).unwrap_or(&[]);
    filter_patients(all, &self.filter)
  }

  fn selected(&self) -> Option<&Patient> {
    let idx = self.list_state.selected()?;
    self.patients().get(idx).copied()
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.patients().len();
    ensure_valid_selection(&mut self.list_state, len);

    let search = if self.search_term.is_empty() {
      String::new()
    } else {
      format!(" '{}'", self.search_term)
    };
    let title = match self.query.state() {
      QueryState::Loading => format!(" Pacientes{} (carregando...) ", search),
      QueryState::Error(e) => format!(" Pacientes{} (erro: {}) ", search, e),
      _ => format!(
        " Pacientes{} ({}){} ",
        search,
        len,
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
        "Falha ao carregar pacientes. Pressione 'r' para tentar de novo."
      } else {
        "Nenhum paciente encontrado."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .patients()
      .iter()
      .map(|patient| {
        let line = Line::from(vec![
          Span::styled(
            format!("{:<8}", patient.id),
            Style::default().fg(Color::Cyan),
          ),
          Span::raw(" "),
          Span::raw(format!("{:<40}", truncate(&patient.name, 40))),
          Span::raw(" "),
          Span::styled(
            format!(
              "{:<20}",
              truncate(patient.insurer.as_deref().unwrap_or("-"), 20)
            ),
            Style::default().fg(Color::Yellow),
          ),
          Span::raw(" "),
          Span::styled(
            patient
              .birth_date
              .map(|d| d.format("%d/%m/%Y").to_string())
              .unwrap_or_default(),
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

  // Key handling helpers for or_else chain pattern
  fn handle_overlays(&mut self, key: KeyEvent) -> Option<ViewAction> {
    self.search.handle_key(key).into_action(|event| {
      match event {
        SearchEvent::Changed(filter) => self.filter = filter,
        SearchEvent::Submitted(term) => {
          // Enter searches on the server; the local filter is no longer needed
          self.filter.clear();
          self.search_server(term);
        }
      }
      ViewAction::None
    })
  }

  fn handle_navigation(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => {
        self.list_state.select_next();
        Some(ViewAction::None)
      }
      KeyCode::Char('k') | KeyCode::Up => {
        self.list_state.select_previous();
        Some(ViewAction::None)
      }
      _ => None,
    }
  }

  fn handle_actions(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match key.code {
      KeyCode::Char('r') => {
        self.query.refetch();
        Some(ViewAction::None)
      }
      KeyCode::Enter => {
        let patient = self.selected()?;
        Some(ViewAction::Push(Box::new(PreviaListView::new(
          self.ctx.clone(),
          patient.id,
          patient.name.clone(),
        ))))
      }
      KeyCode::Char('n') => {
        let patient = self.selected()?;
        Some(ViewAction::Push(Box::new(PreviaFormView::new_draft(
          self.ctx.clone(),
          patient.id,
          patient.name.clone(),
        ))))
      }
      KeyCode::Esc if !self.search_term.is_empty() => {
        self.search_server(String::new());
        Some(ViewAction::None)
      }
      KeyCode::Char('q') | KeyCode::Esc => Some(ViewAction::Pop),
      _ => None,
    }
  }
}

fn patients_query(ctx: &AppContext, term: String) -> Query<Vec<Patient>> {
  let service = ctx.service.clone();
  Query::new(move || {
    let service = service.clone();
    let term = term.clone();
    async move { service.list_patients(&term).await }
  })
}

/// Case-insensitive match on name, id or document
fn filter_patients<'a>(patients: &'a [Patient], filter: &str) -> Vec<&'a Patient> {
  let needle = filter.trim().to_lowercase();
  patients
    .iter()
    .filter(|p| {
      needle.is_empty()
        || p.name.to_lowercase().contains(&needle)
        || p.id.to_string() == needle
        || p
          .document
          .as_deref()
          .is_some_and(|d| d.to_lowercase().contains(&needle))
    })
    .collect()
}

impl View for PatientListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    self
      .handle_overlays(key)
      .or_else(|| self.handle_navigation(key))
      .or_else(|| self.handle_actions(key))
      .unwrap_or(ViewAction::None)
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_list(frame, area);
    self.search.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Pacientes".to_string()
  }

  fn patient(&self) -> Option<(u64, String)> {
    self.selected().map(|p| (p.id, p.name.clone()))
  }

  fn tick(&mut self) {
    self.query.poll();
  }

  fn reload(&mut self) {
    self.query.refetch();
  }

  fn take_notice(&mut self) -> Option<Notice> {
    self.query.take_notice().map(Notice::error)
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "comando").with_priority(10),
      ShortcutInfo::new("/", "filtrar").with_priority(20),
      ShortcutInfo::new("enter", "histórico").with_priority(30),
      ShortcutInfo::new("n", "nova prévia").with_priority(40),
      ShortcutInfo::new("r", "atualizar").with_priority(50),
    ]
  }
}
