//! Grade-adjusted pace model
//!
//! A quadratic fitted to Strava's gradient adjusted pace curve. It maps the
//! gradient of a lap (in percent) to the multiplier that turns the measured
//! speed into its flat-ground equivalent.

/// Quadratic coefficient of the fitted curve
pub const GAP_COEFF_A: f64 = 0.0017002;

/// Linear coefficient of the fitted curve
pub const GAP_COEFF_B: f64 = 0.02949656;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Speed multiplier for a gradient given in percent.
///
/// Flat ground is effort-neutral: `adjustment_factor(0.0) == 1.0`.
/// The curve was fitted over a modest gradient range and is extrapolated
/// without clamping outside of it.
pub fn adjustment_factor(gradient_pct: f64) -> f64 {
  GAP_COEFF_A * gradient_pct * gradient_pct + GAP_COEFF_B * gradient_pct + 1.0
}

/// Convert a speed in km/h to a pace in s/km
pub fn speed_to_pace(speed_kmh: f64) -> f64 {
  SECONDS_PER_HOUR / speed_kmh
}

/// Convert a pace in s/km to a speed in km/h
pub fn pace_to_speed(pace_s_per_km: f64) -> f64 {
  SECONDS_PER_HOUR / pace_s_per_km
}

/// Format a pace in s/km as `m:ss/km`
pub fn format_pace(pace_s_per_km: f64) -> String {
  if !pace_s_per_km.is_finite() || pace_s_per_km < 0.0 {
    return "-:--/km".to_string();
  }

  let minutes = (pace_s_per_km / 60.0).trunc();
  let seconds = (pace_s_per_km - minutes * 60.0).trunc();
  format!("{}:{:02}/km", minutes as i64, seconds as i64)
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assert_approx_eq;

  #[test]
  fn test_flat_ground_is_neutral() {
    assert_eq!(adjustment_factor(0.0), 1.0);
  }

  #[test]
  fn test_adjustment_factor_regression() {
    assert_approx_eq!(adjustment_factor(20.0), 2.2700112, 1e-6);
  }

  #[test]
  fn test_downhill_reduces_factor() {
    // Gentle descents are easier than flat ground
    assert!(adjustment_factor(-5.0) < 1.0);
    assert!(adjustment_factor(5.0) > 1.0);
  }

  #[test]
  fn test_speed_pace_conversion() {
    assert_approx_eq!(speed_to_pace(12.0), 300.0, 1e-9);
    assert_approx_eq!(pace_to_speed(300.0), 12.0, 1e-9);
    assert_approx_eq!(pace_to_speed(speed_to_pace(15.25)), 15.25, 1e-9);
  }

  #[test]
  fn test_format_pace() {
    assert_eq!(format_pace(236.0), "3:56/km");
    assert_eq!(format_pace(300.0), "5:00/km");
    // Seconds are truncated, not rounded
    assert_eq!(format_pace(264.4287), "4:24/km");
    assert_eq!(format_pace(59.9), "0:59/km");
  }

  #[test]
  fn test_format_pace_invalid() {
    assert_eq!(format_pace(f64::INFINITY), "-:--/km");
    assert_eq!(format_pace(f64::NAN), "-:--/km");
  }
}
