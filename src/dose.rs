//! Dose calculators used by the prévia form.

use crate::api::types::{DoseUnit, ProtocolDrug};

/// Body surface area in m² (Mosteller), rounded to two decimals.
pub fn body_surface_area(weight_kg: f64, height_cm: f64) -> Option<f64> {
  if !(weight_kg > 0.0 && height_cm > 0.0) {
    return None;
  }
  Some(round2((weight_kg * height_cm / 3600.0).sqrt()))
}

pub fn dose_by_bsa(mg_per_m2: f64, bsa: f64) -> Option<f64> {
  positive(mg_per_m2, bsa).map(|(d, b)| round2(d * b))
}

pub fn dose_by_weight(mg_per_kg: f64, weight_kg: f64) -> Option<f64> {
  positive(mg_per_kg, weight_kg).map(|(d, w)| round2(d * w))
}

/// Carboplatin dose in mg for a target AUC and a GFR in mL/min.
pub fn calvert(auc: f64, gfr: f64) -> Option<f64> {
  positive(auc, gfr).map(|(a, g)| round2(a * (g + 25.0)))
}

/// Dose of one protocol drug for a patient, when the needed measures are known.
///
/// AUC-based drugs need a GFR, which the form does not collect; they yield `None`.
pub fn drug_dose(
  drug: &ProtocolDrug,
  weight_kg: Option<f64>,
  height_cm: Option<f64>,
) -> Option<f64> {
  match drug.unit {
    DoseUnit::MgPerM2 => {
      let bsa = body_surface_area(weight_kg?, height_cm?)?;
      dose_by_bsa(drug.dose, bsa)
    }
    DoseUnit::MgPerKg => dose_by_weight(drug.dose, weight_kg?),
    DoseUnit::Fixed => (drug.dose > 0.0).then_some(drug.dose),
    DoseUnit::Auc => None,
  }
}

fn positive(a: f64, b: f64) -> Option<(f64, f64)> {
  (a > 0.0 && b > 0.0 && a.is_finite() && b.is_finite()).then_some((a, b))
}

fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mosteller() {
    // sqrt(70 * 170 / 3600) = 1.818...
    assert_eq!(body_surface_area(70.0, 170.0), Some(1.82));
    assert_eq!(body_surface_area(0.0, 170.0), None);
    assert_eq!(body_surface_area(70.0, -1.0), None);
    assert_eq!(body_surface_area(f64::NAN, 170.0), None);
  }

  #[test]
  fn test_dose_by_bsa_and_weight() {
    assert_eq!(dose_by_bsa(75.0, 1.82), Some(136.5));
    assert_eq!(dose_by_weight(6.0, 72.5), Some(435.0));
    assert_eq!(dose_by_weight(6.0, 0.0), None);
  }

  #[test]
  fn test_calvert() {
    assert_eq!(calvert(5.0, 100.0), Some(625.0));
    assert_eq!(calvert(5.0, 0.0), None);
  }

  #[test]
  fn test_drug_dose_by_unit() {
    let drug = |dose, unit| ProtocolDrug {
      name: "x".to_string(),
      dose,
      unit,
    };
    assert_eq!(
      drug_dose(&drug(75.0, DoseUnit::MgPerM2), Some(70.0), Some(170.0)),
      Some(136.5)
    );
    assert_eq!(drug_dose(&drug(75.0, DoseUnit::MgPerM2), Some(70.0), None), None);
    assert_eq!(drug_dose(&drug(2.0, DoseUnit::MgPerKg), Some(70.0), None), Some(140.0));
    assert_eq!(drug_dose(&drug(500.0, DoseUnit::Fixed), None, None), Some(500.0));
    assert_eq!(drug_dose(&drug(5.0, DoseUnit::Auc), Some(70.0), Some(170.0)), None);
  }
}
