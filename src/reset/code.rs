//! Reset code generation.

use rand::{CryptoRng, Rng, rngs::OsRng};

/// Number of decimal digits in a reset code.
pub const CODE_DIGITS: usize = 8;

const CODE_SPACE: u32 = 100_000_000;

/// Draw a fresh code from the operating system's CSPRNG.
#[must_use]
pub fn generate() -> String {
    generate_with(&mut OsRng)
}

/// Uniform over `[0, 10^8)`, zero-padded so the width is always [`CODE_DIGITS`].
///
/// Codes are compared as strings; `00012345` and `12345` are different codes.
pub fn generate_with<R: Rng + CryptoRng>(rng: &mut R) -> String {
    let value = rng.gen_range(0..CODE_SPACE);
    format!("{value:0width$}", width = CODE_DIGITS)
}
