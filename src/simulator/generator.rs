use chrono::{DateTime, Utc};
use rand::Rng;

use crate::db::{helpers::format_retention_key, Reading, ReadingStatus};

pub const HORIZONTAL_RANGE: (f64, f64) = (-1.5, 1.5);
pub const VERTICAL_RANGE: (f64, f64) = (0.9, 1.1);
pub const TEMP_RANGE: (f64, f64) = (45.0, 65.0);
pub const AMP_RANGE: (f64, f64) = (3.5, 5.5);
pub const RUL_RANGE: (f64, f64) = (50.0, 400.0);

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn sample<R: Rng>(rng: &mut R, (low, high): (f64, f64), decimals: i32) -> f64 {
    round_to(rng.gen_range(low..=high), decimals).clamp(low, high)
}

/// One synthetic board sample, with the same precision the firmware reports.
pub fn generate_reading<R: Rng>(rng: &mut R, now: DateTime<Utc>) -> Reading {
    let ax = sample(rng, HORIZONTAL_RANGE, 3);
    let ay = sample(rng, HORIZONTAL_RANGE, 3);

    Reading {
        timestamp: format_retention_key(now),
        ax,
        ay,
        az: sample(rng, VERTICAL_RANGE, 3),
        temp: sample(rng, TEMP_RANGE, 1),
        amp: sample(rng, AMP_RANGE, 2),
        rul_predict: sample(rng, RUL_RANGE, 0),
        status: ReadingStatus::from_vibration(ax, ay),
    }
}
