//! Fixed-point value codec
//!
//! The DDS takes a 32-bit frequency tuning word and a 14-bit phase offset.
//! Frequencies are expressed in kHz throughout the workspace, the same unit
//! as the chip clock [`FCLK`].
//!
//! ```text
//! frequency register = round(2^32 * f / fclk)      f   in [0, 250 000] kHz
//! phase register     = round(2^14 * phi / 360)     phi in [0, 360] deg
//! ```
//!
//! Rounding is half-to-even. The firmware's host tooling has always produced
//! tuning words with that tie-break, so it is part of the wire contract.

use crate::error::ValueRangeError;

/// DDS reference clock in kHz
pub const FCLK: f64 = 500_000.0;

/// Highest encodable output frequency in kHz (Nyquist of [`FCLK`])
pub const FREQUENCY_MAX: f64 = 250_000.0;

/// Highest encodable phase in degrees
pub const PHASE_MAX: f64 = 360.0;

/// Frequency register width
const FREQUENCY_SCALE: f64 = 4_294_967_296.0; // 2^32

/// Phase register width
const PHASE_SCALE: f64 = 16_384.0; // 2^14

/// Smallest representable frequency change in kHz
pub const FREQUENCY_STEP: f64 = FCLK / FREQUENCY_SCALE;

/// Smallest representable phase change in degrees
pub const PHASE_STEP: f64 = PHASE_MAX / PHASE_SCALE;

/// Encode a frequency in kHz into a 32-bit tuning word
pub fn encode_frequency(f: f64) -> Result<u32, ValueRangeError> {
    if !(0.0..=FREQUENCY_MAX).contains(&f) {
        return Err(ValueRangeError::Frequency {
            value: f,
            max: FREQUENCY_MAX,
        });
    }
    // At most 2^31, so the cast never saturates
    Ok((FREQUENCY_SCALE * f / FCLK).round_ties_even() as u32)
}

/// Encode a phase in degrees into a 14-bit phase offset
///
/// 360 deg encodes as `2^14`, one past the last 14-bit value. The field is
/// 16 bits wide on the wire and the firmware treats it modulo `2^14`.
pub fn encode_phase(phi: f64) -> Result<u16, ValueRangeError> {
    if !(0.0..=PHASE_MAX).contains(&phi) {
        return Err(ValueRangeError::Phase { value: phi });
    }
    Ok((PHASE_SCALE * phi / PHASE_MAX).round_ties_even() as u16)
}

/// Decode a 32-bit tuning word into a frequency in kHz
pub fn decode_frequency(register: u32) -> f64 {
    register as f64 * FCLK / FREQUENCY_SCALE
}

/// Decode a phase offset into degrees
pub fn decode_phase(register: u16) -> f64 {
    register as f64 * PHASE_MAX / PHASE_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frequency_endpoints() {
        assert_eq!(encode_frequency(0.0).unwrap(), 0);
        assert_eq!(encode_frequency(FREQUENCY_MAX).unwrap(), 1 << 31);
        assert_eq!(decode_frequency(1 << 31), FREQUENCY_MAX);
    }

    #[test]
    fn test_phase_endpoints() {
        assert_eq!(encode_phase(0.0).unwrap(), 0);
        assert_eq!(encode_phase(90.0).unwrap(), 4096);
        assert_eq!(encode_phase(180.0).unwrap(), 8192);
        assert_eq!(encode_phase(360.0).unwrap(), 16384);
        assert_eq!(decode_phase(4096), 90.0);
    }

    #[test]
    fn test_frequency_out_of_range() {
        assert!(matches!(
            encode_frequency(-1.0),
            Err(ValueRangeError::Frequency { .. })
        ));
        assert!(matches!(
            encode_frequency(FREQUENCY_MAX + 1.0),
            Err(ValueRangeError::Frequency { .. })
        ));
        assert!(encode_frequency(f64::NAN).is_err());
    }

    #[test]
    fn test_phase_out_of_range() {
        assert_eq!(
            encode_phase(-0.1),
            Err(ValueRangeError::Phase { value: -0.1 })
        );
        assert_eq!(
            encode_phase(360.1),
            Err(ValueRangeError::Phase { value: 360.1 })
        );
        assert!(encode_phase(f64::NAN).is_err());
    }

    #[test]
    fn test_frequency_ties_round_to_even() {
        // 15625 * 2^-28 kHz is exactly half a tuning-word step
        let half_step = 15_625.0 / 268_435_456.0;
        assert_eq!(encode_frequency(half_step).unwrap(), 0);
        assert_eq!(encode_frequency(3.0 * half_step).unwrap(), 2);
        assert_eq!(encode_frequency(5.0 * half_step).unwrap(), 2);
        assert_eq!(encode_frequency(7.0 * half_step).unwrap(), 4);
    }

    #[test]
    fn test_phase_ties_round_to_even() {
        let half_step = 180.0 / 16_384.0;
        assert_eq!(encode_phase(half_step).unwrap(), 0);
        assert_eq!(encode_phase(3.0 * half_step).unwrap(), 2);
        assert_eq!(encode_phase(5.0 * half_step).unwrap(), 2);
        assert_eq!(encode_phase(7.0 * half_step).unwrap(), 4);
    }

    #[test]
    fn test_known_tuning_word() {
        // 80 MHz on a 500 MHz clock
        assert_eq!(encode_frequency(80_000.0).unwrap(), 687_194_767);
    }

    proptest! {
        #[test]
        fn frequency_roundtrip_within_half_step(f in 0.0f64..=FREQUENCY_MAX) {
            let back = decode_frequency(encode_frequency(f).unwrap());
            prop_assert!((back - f).abs() <= FREQUENCY_STEP / 2.0 + 1e-9);
        }

        #[test]
        fn phase_roundtrip_within_half_step(phi in 0.0f64..=PHASE_MAX) {
            let back = decode_phase(encode_phase(phi).unwrap());
            prop_assert!((back - phi).abs() <= PHASE_STEP / 2.0 + 1e-12);
        }
    }
}
