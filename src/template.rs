//! Kernel template instantiation.
//!
//! A kernel template is OpenCL C source carrying four `replace_*`
//! placeholders. For each problem size the host renders a typed
//! [`KernelParams`] record into the template. The twiddle angle is written as
//! a hexadecimal float literal (the `%a` form of C) so the device compiler
//! reads back the exact `f32` the host computed, without any decimal
//! rounding.

use core::f64::consts::PI;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// `-π / N_GLOBAL_BUTTERFLIES`, the twiddle angle step.
pub const ANGLE_PLACEHOLDER: &str = "replace_MINUS_PI_over_N_GLOBAL_BUTTERFLIES";
/// Total number of butterflies per stage, `N / 2`.
pub const BUTTERFLIES_PLACEHOLDER: &str = "replace_N_GLOBAL_BUTTERFLIES";
/// Base-2 logarithm of the butterfly count.
pub const LOG2_BUTTERFLIES_PLACEHOLDER: &str = "replace_LOG2_N_GLOBAL_BUTTERFLIES";
/// Butterflies handled by one work item per stage.
pub const PER_THREAD_PLACEHOLDER: &str = "replace_N_LOCAL_BUTTERFLIES";

/// Common prefix of every placeholder identifier.
pub const PLACEHOLDER_PREFIX: &str = "replace_";

const PLACEHOLDERS: [&str; 4] = [
    ANGLE_PLACEHOLDER,
    BUTTERFLIES_PLACEHOLDER,
    LOG2_BUTTERFLIES_PLACEHOLDER,
    PER_THREAD_PLACEHOLDER,
];

/// Stockham image kernel shipped with the crate.
pub const BUILTIN_TEMPLATE: &str = include_str!("../kernels/stockham_images.cl");

/// A validated transform length: a power of two, at least 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProblemSize(usize);

impl ProblemSize {
    pub fn new(len: usize) -> Result<Self> {
        if len < 2 {
            return Err(Error::SizeTooSmall { len });
        }
        if !len.is_power_of_two() {
            return Err(Error::NotPowerOfTwo { len });
        }
        Ok(Self(len))
    }

    /// Number of samples `N`.
    pub fn len(self) -> usize {
        self.0
    }

    /// Butterflies per stage, `N / 2`.
    pub fn butterflies(self) -> usize {
        self.0 / 2
    }

    /// `log2(N / 2)`.
    pub fn log2_butterflies(self) -> u32 {
        self.butterflies().trailing_zeros()
    }

    /// `-π / (N / 2)`, computed in double precision and narrowed once.
    pub fn angle(self) -> f32 {
        (-PI / self.butterflies() as f64) as f32
    }
}

/// Concrete values substituted into a kernel template for one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    pub angle: f32,
    pub total_butterflies: usize,
    pub log2_total: u32,
    pub per_thread: usize,
}

impl KernelParams {
    pub fn new(size: ProblemSize, per_thread: usize) -> Self {
        Self {
            angle: size.angle(),
            total_butterflies: size.butterflies(),
            log2_total: size.log2_butterflies(),
            per_thread,
        }
    }

    fn literal(&self, placeholder: &str) -> Option<String> {
        match placeholder {
            ANGLE_PLACEHOLDER => Some(hex_float(self.angle)),
            BUTTERFLIES_PLACEHOLDER => Some(self.total_butterflies.to_string()),
            LOG2_BUTTERFLIES_PLACEHOLDER => Some(self.log2_total.to_string()),
            PER_THREAD_PLACEHOLDER => Some(self.per_thread.to_string()),
            _ => None,
        }
    }
}

/// Read-only kernel source with all four placeholders present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelTemplate {
    source: String,
}

impl KernelTemplate {
    /// Wrap template text, rejecting it up front if a placeholder is missing
    /// or an unknown one is present.
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        scan_placeholders(&source)?;
        Ok(Self { source })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(fs::read_to_string(path)?)
    }

    pub fn builtin() -> Self {
        Self {
            source: BUILTIN_TEMPLATE.to_string(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn instantiate(&self, params: &KernelParams) -> Result<String> {
        instantiate(&self.source, params)
    }
}

/// Replace every placeholder of `template` with the matching literal from
/// `params`. The template is scanned once, so the result does not depend on
/// the order in which placeholders appear.
pub fn instantiate(template: &str, params: &KernelParams) -> Result<String> {
    scan_placeholders(template)?;
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;
    while let Some(pos) = find_placeholder(rest) {
        out.push_str(&rest[..pos]);
        let token = identifier_at(&rest[pos..]);
        let literal = params
            .literal(token)
            .ok_or_else(|| Error::UnknownPlaceholder(token.to_string()))?;
        out.push_str(&literal);
        rest = &rest[pos + token.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

fn scan_placeholders(template: &str) -> Result<()> {
    let mut seen = [false; PLACEHOLDERS.len()];
    let mut rest = template;
    while let Some(pos) = find_placeholder(rest) {
        let token = identifier_at(&rest[pos..]);
        match PLACEHOLDERS.iter().position(|p| *p == token) {
            Some(i) => seen[i] = true,
            None => return Err(Error::UnknownPlaceholder(token.to_string())),
        }
        rest = &rest[pos + token.len()..];
    }
    match seen.iter().position(|s| !s) {
        Some(i) => Err(Error::MissingPlaceholder(PLACEHOLDERS[i])),
        None => Ok(()),
    }
}

/// Byte offset of the next `replace_` token that starts an identifier.
fn find_placeholder(s: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(off) = s[from..].find(PLACEHOLDER_PREFIX) {
        let pos = from + off;
        let starts_ident = s[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c));
        if starts_ident {
            return Some(pos);
        }
        from = pos + PLACEHOLDER_PREFIX.len();
    }
    None
}

fn identifier_at(s: &str) -> &str {
    let end = s.find(|c: char| !is_ident_char(c)).unwrap_or(s.len());
    &s[..end]
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Format an `f32` as a C99 hexadecimal float literal with an `f` suffix,
/// e.g. `-0x1.921fb6p+1f` for `-π`.
pub fn hex_float(x: f32) -> String {
    if x.is_nan() {
        return "NAN".to_string();
    }
    let sign = if x.is_sign_negative() { "-" } else { "" };
    if x.is_infinite() {
        return format!("{sign}INFINITY");
    }
    let bits = x.to_bits();
    let biased = ((bits >> 23) & 0xff) as i32;
    let mut mantissa = bits & 0x007f_ffff;
    if biased == 0 && mantissa == 0 {
        return format!("{sign}0x0p+0f");
    }
    let mut exp = if biased == 0 {
        // Subnormal: normalise so the leading digit is always 1.
        -126
    } else {
        mantissa |= 1 << 23;
        biased - 127
    };
    while mantissa & (1 << 23) == 0 {
        mantissa <<= 1;
        exp -= 1;
    }
    // 23 fraction bits padded to 24 fill exactly six hex digits.
    let fraction = format!("{:06x}", (mantissa & 0x007f_ffff) << 1);
    let fraction = fraction.trim_end_matches('0');
    let exp_sign = if exp < 0 { '-' } else { '+' };
    if fraction.is_empty() {
        format!("{sign}0x1p{exp_sign}{}f", exp.abs())
    } else {
        format!("{sign}0x1.{fraction}p{exp_sign}{}f", exp.abs())
    }
}

/// Parse a C99 hexadecimal float literal (optional sign and `f` suffix).
///
/// Literals of up to 52 significant bits parse exactly, which covers every
/// literal produced by [`hex_float`].
pub fn parse_hex_float(literal: &str) -> Option<f32> {
    let s = literal.trim();
    let s = s
        .strip_suffix('f')
        .or_else(|| s.strip_suffix('F'))
        .unwrap_or(s);
    let (negative, s) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    let (digits, exp) = s.split_once(['p', 'P'])?;
    let exp: i32 = exp.parse().ok()?;
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut mantissa: u64 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        let d = c.to_digit(16)? as u64;
        mantissa = mantissa.checked_mul(16)?.checked_add(d)?;
        if mantissa >= 1 << 53 {
            return None;
        }
    }
    let scale = exp - 4 * frac_part.len() as i32;
    let value = mantissa as f64 * 2f64.powi(scale);
    let value = value as f32;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "a=replace_MINUS_PI_over_N_GLOBAL_BUTTERFLIES;\n\
                           b=replace_N_GLOBAL_BUTTERFLIES;\n\
                           c=replace_LOG2_N_GLOBAL_BUTTERFLIES;\n\
                           d=replace_N_LOCAL_BUTTERFLIES;\n";

    #[test]
    fn rejects_non_power_of_two_and_tiny_sizes() {
        assert!(matches!(
            ProblemSize::new(6),
            Err(Error::NotPowerOfTwo { len: 6 })
        ));
        assert!(matches!(
            ProblemSize::new(1),
            Err(Error::SizeTooSmall { len: 1 })
        ));
        assert!(matches!(
            ProblemSize::new(0),
            Err(Error::SizeTooSmall { len: 0 })
        ));
        let two = ProblemSize::new(2).unwrap();
        assert_eq!(two.butterflies(), 1);
        assert_eq!(two.log2_butterflies(), 0);
    }

    #[test]
    fn renders_all_four_literals_for_n8() {
        let params = KernelParams::new(ProblemSize::new(8).unwrap(), 1);
        let out = instantiate(MINIMAL, &params).unwrap();
        assert_eq!(
            out,
            "a=-0x1.921fb6p-1f;\nb=4;\nc=2;\nd=1;\n",
            "-π/4 narrowed to f32 is 0x1.921fb6p-1"
        );
    }

    #[test]
    fn substitution_is_order_independent() {
        let reordered = "d=replace_N_LOCAL_BUTTERFLIES;\n\
                         c=replace_LOG2_N_GLOBAL_BUTTERFLIES;\n\
                         b=replace_N_GLOBAL_BUTTERFLIES;\n\
                         a=replace_MINUS_PI_over_N_GLOBAL_BUTTERFLIES;\n";
        let params = KernelParams::new(ProblemSize::new(1024).unwrap(), 4);
        let out = instantiate(reordered, &params).unwrap();
        assert!(out.contains("d=4;"));
        assert!(out.contains("c=9;"));
        assert!(out.contains("b=512;"));
        assert!(!out.contains(PLACEHOLDER_PREFIX));
    }

    #[test]
    fn repeated_placeholders_are_all_replaced() {
        let template = format!("{MINIMAL}e={BUTTERFLIES_PLACEHOLDER}*{BUTTERFLIES_PLACEHOLDER};");
        let params = KernelParams::new(ProblemSize::new(16).unwrap(), 2);
        let out = instantiate(&template, &params).unwrap();
        assert!(out.ends_with("e=8*8;"));
    }

    #[test]
    fn missing_placeholder_is_a_configuration_error() {
        let template = MINIMAL.replace("replace_N_LOCAL_BUTTERFLIES", "1");
        let err = KernelTemplate::new(template).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingPlaceholder(PER_THREAD_PLACEHOLDER)
        ));
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let template = format!("{MINIMAL}x=replace_SOMETHING_ELSE;");
        match KernelTemplate::new(template) {
            Err(Error::UnknownPlaceholder(name)) => assert_eq!(name, "replace_SOMETHING_ELSE"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn prefix_inside_identifier_is_not_a_placeholder() {
        let template = format!("{MINIMAL}int dont_replace_me = 1;");
        assert!(KernelTemplate::new(template).is_ok());
    }

    #[test]
    fn builtin_template_is_valid() {
        assert!(KernelTemplate::new(BUILTIN_TEMPLATE).is_ok());
        assert!(BUILTIN_TEMPLATE.contains("kernel_func"));
    }

    #[test]
    fn hex_float_matches_c_printf() {
        assert_eq!(hex_float(1.0), "0x1p+0f");
        assert_eq!(hex_float(-2.0), "-0x1p+1f");
        assert_eq!(hex_float(0.5), "0x1p-1f");
        assert_eq!(hex_float(1.5), "0x1.8p+0f");
        assert_eq!(hex_float(core::f32::consts::PI), "0x1.921fb6p+1f");
        assert_eq!(hex_float(0.0), "0x0p+0f");
        assert_eq!(hex_float(-0.0), "-0x0p+0f");
        assert_eq!(hex_float(f32::from_bits(1)), "0x1p-149f");
    }

    #[test]
    fn hex_float_round_trips_exactly() {
        for n in [2usize, 8, 1024, 1 << 20, 1 << 30] {
            let angle = ProblemSize::new(n).unwrap().angle();
            let parsed = parse_hex_float(&hex_float(angle)).unwrap();
            assert_eq!(parsed.to_bits(), angle.to_bits(), "n = {n}");
        }
        for x in [f32::MIN_POSITIVE, f32::MAX, f32::from_bits(0x0040_0001)] {
            assert_eq!(parse_hex_float(&hex_float(x)), Some(x));
        }
    }

    #[test]
    fn parse_hex_float_rejects_garbage() {
        assert_eq!(parse_hex_float("1.0"), None);
        assert_eq!(parse_hex_float("0x1.8"), None);
        assert_eq!(parse_hex_float("0xp+0"), None);
        assert_eq!(parse_hex_float("0x1.g p+0"), None);
    }
}
