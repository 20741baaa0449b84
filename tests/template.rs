// Test intent: verifies the builtin kernel template instantiates cleanly for
// every valid size and per-thread count.
use proptest::prelude::*;
use stockham_cl::template::{hex_float, parse_hex_float, PLACEHOLDER_PREFIX};
use stockham_cl::{KernelParams, KernelTemplate, ProblemSize};

fn define(source: &str, name: &str) -> Option<String> {
    source.lines().find_map(|line| {
        let mut parts = line.trim().strip_prefix("#define")?.split_whitespace();
        if parts.next()? != name {
            return None;
        }
        parts.next().map(str::to_string)
    })
}

#[test]
fn builtin_defines_for_n4096() {
    let params = KernelParams::new(ProblemSize::new(4096).unwrap(), 8);
    let source = KernelTemplate::builtin().instantiate(&params).unwrap();
    assert_eq!(
        define(&source, "N_GLOBAL_BUTTERFLIES").as_deref(),
        Some("2048")
    );
    assert_eq!(
        define(&source, "LOG2_N_GLOBAL_BUTTERFLIES").as_deref(),
        Some("11")
    );
    assert_eq!(define(&source, "N_LOCAL_BUTTERFLIES").as_deref(), Some("8"));
    assert_eq!(
        define(&source, "MINUS_PI_OVER_N_GLOBAL_BUTTERFLIES").as_deref(),
        Some("-0x1.921fb6p-10f")
    );
}

proptest! {
    #[test]
    fn instantiation_leaves_no_placeholder(log2_n in 1u32..28, log2_p in 0u32..12) {
        let size = ProblemSize::new(1usize << log2_n).unwrap();
        let params = KernelParams::new(size, 1usize << log2_p);
        let source = KernelTemplate::builtin().instantiate(&params).unwrap();
        prop_assert!(!source.contains(PLACEHOLDER_PREFIX));

        let b = size.butterflies().to_string();
        prop_assert_eq!(define(&source, "N_GLOBAL_BUTTERFLIES"), Some(b));
        let log2 = (log2_n - 1).to_string();
        prop_assert_eq!(define(&source, "LOG2_N_GLOBAL_BUTTERFLIES"), Some(log2));
        let p = (1usize << log2_p).to_string();
        prop_assert_eq!(define(&source, "N_LOCAL_BUTTERFLIES"), Some(p));

        let angle = define(&source, "MINUS_PI_OVER_N_GLOBAL_BUTTERFLIES");
        let angle = angle.unwrap();
        prop_assert_eq!(&angle, &hex_float(size.angle()));
        let bits = parse_hex_float(&angle).map(f32::to_bits);
        prop_assert_eq!(bits, Some(size.angle().to_bits()));
    }
}
