use crate::api::types::Finalization;
use ratatui::prelude::Color;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Display color for the finalization status of a prévia
pub fn finalization_color(status: Option<Finalization>) -> Color {
  match status {
    Some(Finalization::Autorizada) => Color::Green,
    Some(Finalization::AutorizadaParcial) => Color::LightGreen,
    Some(Finalization::Negada) | Some(Finalization::Cancelada) => Color::Red,
    Some(Finalization::Pendente) => Color::Yellow,
    None => Color::White,
  }
}

/// Human-readable file size
pub fn format_size(bytes: u64) -> String {
  match bytes {
    b if b >= 1024 * 1024 => format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)),
    b if b >= 1024 => format!("{:.0} KB", b as f64 / 1024.0),
    b => format!("{} B", b),
  }
}
