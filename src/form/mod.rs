//! Prévia form state: masked inputs, debounced fields, parecer registros and saving.

pub mod draft;
pub mod field;
pub mod mask;
pub mod parecer;
pub mod submit;

pub use draft::{DraftAttachment, FormDraft, HeaderField};
pub use parecer::{ParecerField, MAX_PARECERES};
pub use submit::{pending_attachment, submit, SubmitOutcome};
