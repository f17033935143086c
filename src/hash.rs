//! A fast, stable 32-bit string hash.
//!
//! Used for attachment filenames and option colors, where the only requirement
//! is that the same input always yields the same value across processes and
//! releases. Not suitable for anything adversarial.

/// Polynomial rolling hash (`h = h * 31 + b`) over the UTF-8 bytes of `input`.
pub fn rolling_hash(input: &str) -> u32 {
    input
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)))
}
