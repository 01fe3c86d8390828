//! Cache key namespaces.

use std::fmt;

/// Prefix shared by every cache entry managed by this application.
pub const CACHE_PREFIX: &str = "previas:cache:";

/// One cached API read, identified by namespace and entity id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// Consultation history of a patient
  PreviasByPatient(u64),
  /// A single prévia with its pareceres
  Previa(u64),
  /// Cycle/day entries of a prévia
  PreviaCycles(u64),
  /// Attachment list of a prévia
  PreviaAttachments(u64),
  /// Patient search results
  Patients { search: String },
  /// Registered treatment protocols
  Protocols,
}

impl CacheKey {
  pub fn patients(search: &str) -> Self {
    Self::Patients {
      search: normalize_search(search),
    }
  }

  pub fn namespace(&self) -> &'static str {
    match self {
      Self::PreviasByPatient(_) => "previas_by_patient",
      Self::Previa(_) => "previa",
      Self::PreviaCycles(_) => "previa_cycles",
      Self::PreviaAttachments(_) => "previa_attachments",
      Self::Patients { .. } => "patients",
      Self::Protocols => "protocols",
    }
  }

  fn id(&self) -> String {
    match self {
      Self::PreviasByPatient(id)
      | Self::Previa(id)
      | Self::PreviaCycles(id)
      | Self::PreviaAttachments(id) => id.to_string(),
      Self::Patients { search } if search.is_empty() => "all".to_string(),
      Self::Patients { search } => search.clone(),
      Self::Protocols => "all".to_string(),
    }
  }

  /// Prefix matching every key of one namespace.
  pub fn namespace_prefix(namespace: &str) -> String {
    format!("{}{}:", CACHE_PREFIX, namespace)
  }

  /// Human-readable label for log lines.
  pub fn description(&self) -> String {
    match self {
      Self::PreviasByPatient(id) => format!("previas by patient {}", id),
      Self::Previa(id) => format!("previa {}", id),
      Self::PreviaCycles(id) => format!("cycles of previa {}", id),
      Self::PreviaAttachments(id) => format!("attachments of previa {}", id),
      Self::Patients { search } if search.is_empty() => "all patients".to_string(),
      Self::Patients { search } => format!("patients matching '{}'", search),
      Self::Protocols => "protocols".to_string(),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}:{}", CACHE_PREFIX, self.namespace(), self.id())
  }
}

/// Trim and lowercase so equivalent searches share an entry.
fn normalize_search(search: &str) -> String {
  search.trim().to_lowercase()
}
