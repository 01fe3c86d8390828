use crate::api::cached_client::PreviasService;
use crate::cache::CACHE_PREFIX;
use crate::commands::{self, ParsedCommand};
use crate::event::{Event, EventHandler};
use crate::ui;
use crate::ui::components::{CommandEvent, CommandInput, KeyResult};
use crate::ui::view::{Notice, ShortcutInfo, View, ViewAction};
use crate::ui::views::{PatientListView, PreviaFormView, PreviaListView};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Shared handles passed to every view
#[derive(Clone)]
pub struct AppContext {
  pub service: PreviasService,
  /// Name stamped on parecer audit fields
  pub user: Option<String>,
  /// Default clinic for new drafts
  pub clinic: Option<String>,
}

/// Screen a deep link opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
  Patients,
  History,
  NewPrevia,
}

impl Tab {
  fn parse(s: &str) -> Option<Self> {
    match s.trim().to_lowercase().as_str() {
      "pacientes" => Some(Tab::Patients),
      "previas" | "historico" => Some(Tab::History),
      "nova" | "nova-previa" => Some(Tab::NewPrevia),
      _ => None,
    }
  }
}

/// `?tab=..&patientId=..&previaId=..`, alone or at the end of a full URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeepLink {
  pub tab: Option<Tab>,
  pub patient_id: Option<u64>,
  pub previa_id: Option<u64>,
}

impl DeepLink {
  pub fn parse(link: &str) -> Result<Self> {
    let link = link.trim();
    let url = match Url::parse(link) {
      Ok(url) => url,
      // Bare query strings and relative paths
      Err(_) => Url::parse("previas://app/")
        .and_then(|base| base.join(link))
        .wrap_err_with(|| format!("invalid link: {}", link))?,
    };

    let mut parsed = DeepLink::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "tab" => {
          parsed.tab = Some(Tab::parse(&value).ok_or_else(|| eyre!("unknown tab '{}'", value))?);
        }
        "patientId" => {
          parsed.patient_id = Some(
            value
              .parse()
              .wrap_err_with(|| format!("invalid patientId '{}'", value))?,
          );
        }
        "previaId" => {
          parsed.previa_id = Some(
            value
              .parse()
              .wrap_err_with(|| format!("invalid previaId '{}'", value))?,
          );
        }
        other => warn!(param = other, "ignoring unknown link parameter"),
      }
    }
    Ok(parsed)
  }
}

/// Main application state
pub struct App {
  ctx: AppContext,
  api_url: String,

  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,

  command_input: CommandInput,

  notice: Option<Notice>,

  should_quit: bool,
}

impl App {
  pub fn new(ctx: AppContext, api_url: String, link: DeepLink) -> Self {
    let view_stack = initial_stack(&ctx, &link);
    Self {
      ctx,
      api_url,
      view_stack,
      command_input: CommandInput::new(),
      notice: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(100));

    let result = self.main_loop(&mut terminal, &mut events).await;

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn main_loop(
    &mut self,
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(Event::Key(key)) => self.handle_key(key),
        Some(Event::Tick) => self.tick(),
        None => break,
      }
    }
    Ok(())
  }

  // Accessors for drawing

  pub fn api_url(&self) -> &str {
    &self.api_url
  }

  pub fn current_view_mut(&mut self) -> Option<&mut Box<dyn View>> {
    self.view_stack.last_mut()
  }

  pub fn command_input(&self) -> &CommandInput {
    &self.command_input
  }

  pub fn notice(&self) -> Option<&Notice> {
    self.notice.as_ref()
  }

  pub fn breadcrumb(&self) -> Vec<String> {
    self.view_stack.iter().map(|v| v.breadcrumb_label()).collect()
  }

  pub fn shortcuts(&self) -> Vec<ShortcutInfo> {
    self
      .view_stack
      .last()
      .map(|v| v.shortcuts())
      .unwrap_or_default()
  }

  /// Patient in focus plus the cache switch, for the header
  pub fn context_label(&self) -> String {
    let mut label = self
      .current_patient()
      .map(|(id, name)| format!("{} (#{})", name, id))
      .unwrap_or_default();
    if !self.ctx.service.cache().is_enabled() {
      if !label.is_empty() {
        label.push(' ');
      }
      label.push_str("[cache desligado]");
    }
    label
  }

  fn current_patient(&self) -> Option<(u64, String)> {
    self.view_stack.iter().rev().find_map(|v| v.patient())
  }

  // Events

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    // Any key dismisses the notice; the key still does its job
    self.notice = None;

    let captures = self
      .view_stack
      .last()
      .is_some_and(|v| v.captures_input());
    if self.command_input.is_active() || !captures {
      match self.command_input.handle_key(key) {
        KeyResult::Event(CommandEvent::Submitted(cmd)) => {
          self.execute_command(&cmd);
          return;
        }
        KeyResult::Event(CommandEvent::Cancelled) | KeyResult::Handled => return,
        KeyResult::NotHandled => {}
      }
    }

    let action = match self.view_stack.last_mut() {
      Some(view) => view.handle_key(key),
      None => ViewAction::None,
    };
    self.apply(action);
  }

  fn apply(&mut self, action: ViewAction) {
    match action {
      ViewAction::None => {}
      ViewAction::Push(view) => self.view_stack.push(view),
      ViewAction::Pop => {
        if self.view_stack.len() > 1 {
          self.view_stack.pop();
          if let Some(view) = self.view_stack.last_mut() {
            view.on_resume();
          }
        } else {
          self.should_quit = true;
        }
      }
    }
  }

  fn tick(&mut self) {
    for view in self.view_stack.iter_mut() {
      view.tick();
      if let Some(notice) = view.take_notice() {
        self.notice = Some(notice);
      }
    }
    if self.notice.as_ref().is_some_and(|n| n.expired()) {
      self.notice = None;
    }
  }

  fn reload_views(&mut self) {
    for view in self.view_stack.iter_mut() {
      view.reload();
    }
  }

  fn execute_command(&mut self, line: &str) {
    let command = match commands::parse(line) {
      Ok(command) => command,
      Err(message) => {
        self.notice = Some(Notice::error(message));
        return;
      }
    };
    info!(?command, "command");

    let cache = self.ctx.service.cache().clone();
    match command {
      ParsedCommand::Patients => {
        self.view_stack = vec![Box::new(PatientListView::new(self.ctx.clone()))];
      }
      ParsedCommand::History => match self.current_patient() {
        Some((id, name)) => {
          self.view_stack = vec![
            Box::new(PatientListView::new(self.ctx.clone())),
            Box::new(PreviaListView::new(self.ctx.clone(), id, name)),
          ];
        }
        None => self.notice = Some(Notice::error("Selecione um paciente primeiro")),
      },
      ParsedCommand::NewPrevia => match self.current_patient() {
        Some((id, name)) => {
          self
            .view_stack
            .push(Box::new(PreviaFormView::new_draft(self.ctx.clone(), id, name)));
        }
        None => self.notice = Some(Notice::error("Selecione um paciente primeiro")),
      },
      ParsedCommand::Reload => {
        cache.mark_stale(CACHE_PREFIX);
        self.reload_views();
        self.notice = Some(Notice::info("Atualizando dados em segundo plano"));
      }
      ParsedCommand::ClearCache => {
        cache.clear_all();
        self.reload_views();
        self.notice = Some(Notice::info("Cache apagado"));
      }
      ParsedCommand::Limit(None) => {
        self.notice = Some(Notice::info(format!(
          "Exibindo até {} prévias por paciente",
          cache.record_limit()
        )));
      }
      ParsedCommand::Limit(Some(n)) => {
        let stored = cache.set_record_limit(n);
        self.notice = Some(Notice::info(format!(
          "Exibindo até {} prévias por paciente",
          stored
        )));
      }
      ParsedCommand::Cache(None) => {
        let state = if cache.is_enabled() { "ligado" } else { "desligado" };
        self.notice = Some(Notice::info(format!("Cache {}", state)));
      }
      ParsedCommand::Cache(Some(enabled)) => {
        cache.set_enabled(enabled);
        let state = if enabled { "ligado" } else { "desligado" };
        self.notice = Some(Notice::info(format!("Cache {}", state)));
      }
      ParsedCommand::Quit => self.should_quit = true,
    }
  }
}

/// Views a deep link opens, bottom to top. The patient list is always the root.
fn initial_stack(ctx: &AppContext, link: &DeepLink) -> Vec<Box<dyn View>> {
  let mut stack: Vec<Box<dyn View>> = vec![Box::new(PatientListView::new(ctx.clone()))];

  let Some(patient_id) = link.patient_id else {
    if link.previa_id.is_some() || link.tab.is_some_and(|t| t != Tab::Patients) {
      warn!(?link, "link needs a patientId, opening the patient list");
    }
    return stack;
  };
  if link.tab == Some(Tab::Patients) {
    return stack;
  }

  // The real name shows up once the patient list loads; the link only carries the id
  let name = format!("Paciente {}", patient_id);
  stack.push(Box::new(PreviaListView::new(ctx.clone(), patient_id, name.clone())));

  match (link.previa_id, link.tab) {
    (Some(previa_id), _) => {
      stack.push(Box::new(PreviaFormView::edit(ctx.clone(), patient_id, name, previa_id)));
    }
    (None, Some(Tab::NewPrevia)) => {
      stack.push(Box::new(PreviaFormView::new_draft(ctx.clone(), patient_id, name)));
    }
    _ => {}
  }
  stack
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::fake::FakeApi;
  use crate::cache::{CacheService, MemoryStore};
  use std::sync::Arc;

  fn ctx() -> AppContext {
    let api = Arc::new(FakeApi::new().with_patient(42, "Maria Souza"));
    let cache = CacheService::new(Arc::new(MemoryStore::new()));
    AppContext {
      service: PreviasService::new(api, cache),
      user: Some("Maria".to_string()),
      clinic: None,
    }
  }

  fn app(link: &str) -> App {
    let link = DeepLink::parse(link).unwrap();
    App::new(ctx(), "https://clinica.example.com/api/".to_string(), link)
  }

  #[test]
  fn test_parse_query_string() {
    let link = DeepLink::parse("?tab=nova&patientId=42").unwrap();
    assert_eq!(
      link,
      DeepLink {
        tab: Some(Tab::NewPrevia),
        patient_id: Some(42),
        previa_id: None,
      }
    );
  }

  #[test]
  fn test_parse_full_url() {
    let link =
      DeepLink::parse("https://clinica.example.com/previas?tab=historico&patientId=7&previaId=99")
        .unwrap();
    assert_eq!(link.tab, Some(Tab::History));
    assert_eq!(link.patient_id, Some(7));
    assert_eq!(link.previa_id, Some(99));
  }

  #[test]
  fn test_parse_rejects_bad_values() {
    assert!(DeepLink::parse("?tab=relatorios").is_err());
    assert!(DeepLink::parse("?patientId=abc").is_err());
    assert_eq!(DeepLink::parse("").unwrap(), DeepLink::default());
  }

  #[tokio::test]
  async fn test_link_seeds_view_stack() {
    assert_eq!(app("").breadcrumb(), vec!["Pacientes"]);
    assert_eq!(
      app("?tab=previas&patientId=42").breadcrumb(),
      vec!["Pacientes", "Prévias [Paciente 42]"]
    );
    assert_eq!(
      app("?tab=nova&patientId=42").breadcrumb(),
      vec!["Pacientes", "Prévias [Paciente 42]", "Nova prévia"]
    );
    assert_eq!(
      app("?patientId=42&previaId=5").breadcrumb(),
      vec!["Pacientes", "Prévias [Paciente 42]", "Prévia"]
    );
    // A prévia without its patient cannot be opened
    assert_eq!(app("?previaId=5").breadcrumb(), vec!["Pacientes"]);
  }

  #[tokio::test]
  async fn test_commands_update_preferences() {
    let mut app = app("?patientId=42");

    app.execute_command("limite 20");
    assert_eq!(app.ctx.service.cache().record_limit(), 20);

    app.execute_command("cache off");
    assert!(!app.ctx.service.cache().is_enabled());
    assert!(app.context_label().contains("cache desligado"));

    app.execute_command("relatorio");
    assert_eq!(
      app.notice().map(|n| n.level),
      Some(crate::ui::view::NoticeLevel::Error)
    );
  }

  #[tokio::test]
  async fn test_navigation_commands() {
    let mut app = app("?patientId=42");

    app.execute_command("nova");
    assert_eq!(app.breadcrumb().last().map(String::as_str), Some("Nova prévia"));

    app.execute_command("previas");
    assert_eq!(app.breadcrumb(), vec!["Pacientes", "Prévias [Paciente 42]"]);

    app.execute_command("pacientes");
    assert_eq!(app.breadcrumb(), vec!["Pacientes"]);

    // No patient selected yet on the patient list
    app.execute_command("nova");
    assert_eq!(app.breadcrumb(), vec!["Pacientes"]);

    app.execute_command("quit");
    assert!(app.should_quit);
  }

  #[tokio::test]
  async fn test_pop_root_quits() {
    let mut app = app("?patientId=42");
    app.apply(ViewAction::Pop);
    assert_eq!(app.breadcrumb(), vec!["Pacientes"]);
    assert!(!app.should_quit);
    app.apply(ViewAction::Pop);
    assert!(app.should_quit);
  }
}
