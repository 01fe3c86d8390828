//! `DD/MM/YYYY` input mask and date arithmetic on masked values.

use chrono::NaiveDate;

/// Length of a complete masked date.
pub const DATE_LEN: usize = 10;

/// Mask raw input into `DD/MM/YYYY`, incrementally.
///
/// Non-digits are ignored and at most eight digits are kept. Returns `None`
/// when the digits would start an impossible day (> 31, or 00) or month
/// (> 12, or 00); the caller keeps the previous value in that case.
pub fn apply_date_mask(raw: &str) -> Option<String> {
  let digits: Vec<u32> = raw
    .chars()
    .filter_map(|c| c.to_digit(10))
    .take(8)
    .collect();

  if !valid_prefix(&digits) {
    return None;
  }

  let mut out = String::with_capacity(DATE_LEN);
  for (i, d) in digits.iter().enumerate() {
    if i == 2 || i == 4 {
      out.push('/');
    }
    out.push(char::from_digit(*d, 10).unwrap_or('0'));
  }
  Some(out)
}

fn valid_prefix(digits: &[u32]) -> bool {
  match digits {
    [d0, ..] if *d0 > 3 => false,
    [d0, d1, ..] if d0 * 10 + d1 > 31 || d0 * 10 + d1 == 0 => false,
    [_, _, m0, ..] if *m0 > 1 => false,
    [_, _, m0, m1, ..] if m0 * 10 + m1 > 12 || m0 * 10 + m1 == 0 => false,
    _ => true,
  }
}

/// Parse a complete `DD/MM/YYYY` value. Incomplete or impossible dates are `None`.
pub fn parse_br_date(s: &str) -> Option<NaiveDate> {
  if s.len() != DATE_LEN {
    return None;
  }
  NaiveDate::parse_from_str(s, "%d/%m/%Y").ok()
}

pub fn format_br_date(date: Option<NaiveDate>) -> String {
  date
    .map(|d| d.format("%d/%m/%Y").to_string())
    .unwrap_or_default()
}

/// Absolute whole days between two masked dates; `None` unless both are complete.
pub fn analysis_days(request: &str, opinion: &str) -> Option<i64> {
  let request = parse_br_date(request)?;
  let opinion = parse_br_date(opinion)?;
  Some((opinion - request).num_days().abs())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_full_date() {
    assert_eq!(apply_date_mask("15032024").as_deref(), Some("15/03/2024"));
  }

  #[test]
  fn test_incremental_mask() {
    assert_eq!(apply_date_mask("1").as_deref(), Some("1"));
    assert_eq!(apply_date_mask("15").as_deref(), Some("15"));
    assert_eq!(apply_date_mask("150").as_deref(), Some("15/0"));
    assert_eq!(apply_date_mask("15/03").as_deref(), Some("15/03"));
    assert_eq!(apply_date_mask("15/03/2").as_deref(), Some("15/03/2"));
    assert_eq!(apply_date_mask("").as_deref(), Some(""));
  }

  #[test]
  fn test_extra_digits_ignored() {
    assert_eq!(apply_date_mask("150320249").as_deref(), Some("15/03/2024"));
    assert_eq!(apply_date_mask("15/03/2024x").as_deref(), Some("15/03/2024"));
  }

  #[test]
  fn test_invalid_prefixes_rejected() {
    assert_eq!(apply_date_mask("99"), None);
    assert_eq!(apply_date_mask("4"), None);
    assert_eq!(apply_date_mask("32"), None);
    assert_eq!(apply_date_mask("00"), None);
    assert_eq!(apply_date_mask("012"), None);
    assert_eq!(apply_date_mask("0113"), None);
    assert_eq!(apply_date_mask("0100"), None);
    assert!(apply_date_mask("3112").is_some());
  }

  #[test]
  fn test_parse_requires_complete_date() {
    assert_eq!(
      parse_br_date("05/03/2024"),
      NaiveDate::from_ymd_opt(2024, 3, 5)
    );
    assert_eq!(parse_br_date("05/03/202"), None);
    assert_eq!(parse_br_date("31/02/2024"), None);
  }

  #[test]
  fn test_analysis_days() {
    assert_eq!(analysis_days("01/03/2024", "05/03/2024"), Some(4));
    assert_eq!(analysis_days("05/03/2024", "01/03/2024"), Some(4));
    assert_eq!(analysis_days("01/03/2024", "01/03/2024"), Some(0));
    assert_eq!(analysis_days("01/03/2024", "05/03/202"), None);
    assert_eq!(analysis_days("", "05/03/2024"), None);
  }

  #[test]
  fn test_format_round_trip() {
    let date = NaiveDate::from_ymd_opt(2024, 12, 1);
    assert_eq!(format_br_date(date), "01/12/2024");
    assert_eq!(format_br_date(None), "");
  }
}
