//! Pulse-to-seed mixing.
//!
//! # Derivation Model
//!
//! The first seven hex digits of the pulse seed a scratch ChaCha20
//! generator. The remaining digits (after a one-digit separator) are read
//! as bytes and each byte is XORed with a scratch draw bounded by the
//! previous draw. The resulting cycle values are folded into a single
//! seed through a shift/XOR mixer.
//!
//! The current wall-clock instant is mixed in twice: once into every
//! cycle value, and once into the running sum of prior trace values.
//! Two calls with the same pulse therefore give different seeds unless the
//! clock is pinned. This is statistical mixing, not a cryptographic
//! construction.

use super::clock::{Clock, SystemClock};
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use thiserror::Error;

/// Minimum accepted pulse length in hex characters.
pub const MIN_PULSE_LEN: usize = 9;

/// Hex digits used to seed the scratch generator (28 bits).
const SCRATCH_DIGITS: usize = 7;

/// Offset of the cycle material; the digit at index 7 is a separator.
const CYCLE_OFFSET: usize = SCRATCH_DIGITS + 1;

/// Upper bound on inner mixing rounds per cycle value.
const MAX_MIX_ROUNDS: usize = 8;

/// Upper bound on sign-clearing rounds before the sign bit is masked off.
const MAX_SIGN_ROUNDS: usize = 32;

/// Errors that can occur during seed derivation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    /// The pulse is too short or contains non-hex characters.
    #[error("invalid pulse input: {0}")]
    InvalidInput(String),
}

/// A seed derived from one pulse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedSeed {
    seed: i32,
    trace: Vec<i32>,
}

impl DerivedSeed {
    /// The generator seed, always in `[0, i32::MAX]`.
    #[inline]
    pub fn seed(&self) -> i32 {
        self.seed
    }

    /// Intermediate mix values, one per cycle byte. Diagnostic only.
    #[inline]
    pub fn trace(&self) -> &[i32] {
        &self.trace
    }
}

/// Derives a seed from `pulse` using the system clock.
pub fn derive(pulse: &str) -> Result<DerivedSeed, DerivationError> {
    derive_with_clock(pulse, &SystemClock)
}

/// Derives a seed from `pulse`, reading wall-clock time from `clock`.
///
/// `pulse` must be at least [`MIN_PULSE_LEN`] ASCII hex digits. A trailing
/// odd digit in the cycle material is ignored. A pulse with no complete
/// cycle byte yields `i32::MAX` and an empty trace.
pub fn derive_with_clock(pulse: &str, clock: &dyn Clock) -> Result<DerivedSeed, DerivationError> {
    if pulse.len() < MIN_PULSE_LEN {
        return Err(DerivationError::InvalidInput(format!(
            "pulse has {} characters, need at least {}",
            pulse.len(),
            MIN_PULSE_LEN
        )));
    }
    if let Some(pos) = pulse.bytes().position(|b| !b.is_ascii_hexdigit()) {
        return Err(DerivationError::InvalidInput(format!(
            "non-hex character at offset {pos}"
        )));
    }

    let scratch_seed = u32::from_str_radix(&pulse[..SCRATCH_DIGITS], 16)
        .map_err(|e| DerivationError::InvalidInput(e.to_string()))?;
    let mut scratch = ChaCha20Rng::seed_from_u64(u64::from(scratch_seed));

    let cycle_text = &pulse[CYCLE_OFFSET..];
    let whole = cycle_text.len() & !1;
    let material = hex::decode(&cycle_text[..whole])
        .map_err(|e| DerivationError::InvalidInput(e.to_string()))?;

    let mut prev = 0u8;
    let mut cycles: Vec<i32> = material
        .iter()
        .map(|&byte| {
            let x = next_in_range(&mut scratch, prev.min(byte), prev.max(byte));
            prev = x;
            i32::from(byte ^ x)
        })
        .collect();

    let now = clock.now();
    let stamp = now.timestamp_millis().to_le_bytes();
    for cycle in cycles.iter_mut() {
        for b in stamp {
            *cycle ^= i32::from(b);
        }
    }
    let subsec = now.timestamp_subsec_millis() as i32;

    if cycles.is_empty() {
        tracing::warn!(
            pulse_len = pulse.len(),
            "Pulse carries no cycle material, using saturated seed"
        );
        return Ok(DerivedSeed {
            seed: i32::MAX,
            trace: Vec::new(),
        });
    }

    let mut final_seed: i32 = -1;
    let mut trace = Vec::with_capacity(cycles.len());
    for &jostle in &cycles {
        final_seed ^= jostle;
        final_seed = scramble(final_seed, jostle);
        final_seed = clear_sign(final_seed, jostle);

        let carried = trace
            .iter()
            .fold(0i32, |acc: i32, &part: &i32| acc.wrapping_add(part ^ subsec));
        final_seed ^= carried & i32::MAX;

        trace.push(final_seed);
    }

    tracing::trace!(
        seed = final_seed,
        cycles = cycles.len(),
        "Derived seed from pulse"
    );

    Ok(DerivedSeed {
        seed: final_seed,
        trace,
    })
}

/// Half-open draw in `[lo, hi)`; returns `lo` when the range is empty.
fn next_in_range(rng: &mut ChaCha20Rng, lo: u8, hi: u8) -> u8 {
    if lo >= hi {
        lo
    } else {
        rng.gen_range(lo..hi)
    }
}

/// Shift/XOR mixer driven by the low bits of `jostle`.
fn scramble(mut seed: i32, jostle: i32) -> i32 {
    let mut bitsource = jostle;
    for _ in 0..MAX_MIX_ROUNDS {
        let shift = bitsource & 0b111;
        if shift == 0 {
            break;
        }
        seed = seed.wrapping_shl(shift as u32) ^ jostle;

        let high = jostle | 0x80;
        bitsource >>= 1;
        match bitsource & 0b11 {
            0b01 | 0b10 => bitsource = (bitsource ^ (bitsource << 3)) & 0xFF,
            _ if bitsource > high => bitsource ^= high,
            _ => {}
        }
    }
    seed
}

/// Shifts `seed` left, folding in `jostle`, until the sign bit clears.
fn clear_sign(mut seed: i32, jostle: i32) -> i32 {
    let fold = jostle & !1;
    for _ in 0..MAX_SIGN_ROUNDS {
        if seed >= 0 {
            return seed;
        }
        seed = seed.wrapping_shl(1) ^ fold;
    }
    seed & i32::MAX
}
