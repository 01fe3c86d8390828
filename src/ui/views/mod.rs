mod patient_list;
mod previa_form;
mod previa_list;

pub use patient_list::PatientListView;
pub use previa_form::PreviaFormView;
pub use previa_list::PreviaListView;

use crate::cache::CacheSource;
use crate::query::Query;
use chrono::Local;

/// Title suffix telling where the shown data came from
fn source_suffix<T: Send + 'static>(query: &Query<T>) -> String {
  let mut suffix = match (query.source(), query.cached_at()) {
    (Some(CacheSource::CacheFresh | CacheSource::CacheStale), Some(at)) => {
      format!(" · cache {}", at.with_timezone(&Local).format("%H:%M"))
    }
    _ => String::new(),
  };
  if query.is_revalidating() {
    suffix.push_str(" · atualizando...");
  }
  suffix
}
