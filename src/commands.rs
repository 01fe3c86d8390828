/// Available commands and autocomplete logic

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "pacientes",
    aliases: &["p", "patients"],
    description: "Lista de pacientes",
  },
  Command {
    name: "previas",
    aliases: &["h", "historico"],
    description: "Histórico de prévias do paciente",
  },
  Command {
    name: "nova",
    aliases: &["n", "nova-previa"],
    description: "Nova prévia para o paciente",
  },
  Command {
    name: "recarregar",
    aliases: &["r", "reload"],
    description: "Revalidar dados em segundo plano",
  },
  Command {
    name: "limpar-cache",
    aliases: &["clear"],
    description: "Apagar todo o cache local",
  },
  Command {
    name: "limite",
    aliases: &["l", "limit"],
    description: "Prévias exibidas no histórico (limite <n>)",
  },
  Command {
    name: "cache",
    aliases: &["c"],
    description: "Ligar/desligar o cache (cache on|off)",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit", "sair"],
    description: "Sair",
  },
];

/// A command line parsed into an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
  Patients,
  History,
  NewPrevia,
  Reload,
  ClearCache,
  /// `None` shows the current limit
  Limit(Option<usize>),
  /// `None` shows whether caching is on
  Cache(Option<bool>),
  Quit,
}

/// Parse `name [arg]`. Returns an error message for unknown commands or bad arguments.
pub fn parse(line: &str) -> Result<ParsedCommand, String> {
  let mut parts = line.split_whitespace();
  let Some(word) = parts.next() else {
    return Err("Comando vazio".to_string());
  };
  let arg = parts.next();
  let word = word.to_lowercase();

  let Some(cmd) = COMMANDS
    .iter()
    .find(|c| c.name == word || c.aliases.contains(&word.as_str()))
  else {
    return Err(format!("Comando desconhecido: {}", word));
  };

  match cmd.name {
    "pacientes" => Ok(ParsedCommand::Patients),
    "previas" => Ok(ParsedCommand::History),
    "nova" => Ok(ParsedCommand::NewPrevia),
    "recarregar" => Ok(ParsedCommand::Reload),
    "limpar-cache" => Ok(ParsedCommand::ClearCache),
    "limite" => match arg {
      None => Ok(ParsedCommand::Limit(None)),
      Some(n) => n
        .parse::<usize>()
        .map(|n| ParsedCommand::Limit(Some(n)))
        .map_err(|_| format!("Limite inválido: {}", n)),
    },
    "cache" => match arg.map(|a| a.to_lowercase()).as_deref() {
      None => Ok(ParsedCommand::Cache(None)),
      Some("on") | Some("ligar") => Ok(ParsedCommand::Cache(Some(true))),
      Some("off") | Some("desligar") => Ok(ParsedCommand::Cache(Some(false))),
      Some(other) => Err(format!("Use 'cache on' ou 'cache off', não '{}'", other)),
    },
    _ => Ok(ParsedCommand::Quit),
  }
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("previas");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "previas");
  }

  #[test]
  fn test_alias_match() {
    let suggestions = get_suggestions("h");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "previas");
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("pac");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "pacientes");
  }

  #[test]
  fn test_fuzzy_match() {
    let suggestions = get_suggestions("cache");
    assert_eq!(suggestions[0].name, "cache");
    assert!(suggestions.iter().any(|c| c.name == "limpar-cache"));
  }

  #[test]
  fn test_parse_simple() {
    assert_eq!(parse("pacientes"), Ok(ParsedCommand::Patients));
    assert_eq!(parse("N"), Ok(ParsedCommand::NewPrevia));
    assert_eq!(parse("  quit "), Ok(ParsedCommand::Quit));
    assert!(parse("").is_err());
    assert!(parse("foo").is_err());
  }

  #[test]
  fn test_parse_arguments() {
    assert_eq!(parse("limite 20"), Ok(ParsedCommand::Limit(Some(20))));
    assert_eq!(parse("limite"), Ok(ParsedCommand::Limit(None)));
    assert!(parse("limite dez").is_err());
    assert_eq!(parse("cache off"), Ok(ParsedCommand::Cache(Some(false))));
    assert_eq!(parse("cache ON"), Ok(ParsedCommand::Cache(Some(true))));
    assert_eq!(parse("cache"), Ok(ParsedCommand::Cache(None)));
    assert!(parse("cache talvez").is_err());
  }
}
