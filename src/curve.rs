//! Fader position <-> gain curve
//!
//! Maps a normalized control position in `[0, 1]` onto a perceptual gain
//! coefficient. Position `1.0` is unity gain (0 dB).

/// Curve calibration. Using 192 in the offset instead would top out at +6 dB.
const CURVE_SCALE: f64 = 198.0;

/// Convert a uniform position (0..=1) to a gain coefficient.
pub fn position_to_gain(pos: f64) -> f64 {
    if pos == 0.0 {
        return 0.0;
    }
    2.0_f64.powf((pos.sqrt().sqrt().sqrt() * CURVE_SCALE - CURVE_SCALE) / 6.0)
}

/// Convert a gain coefficient back to a uniform position.
pub fn gain_to_position(gain: f64) -> f64 {
    if gain == 0.0 {
        return 0.0;
    }
    ((6.0 * gain.log2() + CURVE_SCALE) / CURVE_SCALE).powi(8)
}
