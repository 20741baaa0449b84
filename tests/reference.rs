// Test intent: verifies both host references agree with each other and with
// the simulated device kernel.
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use stockham_cl::reference::{bit_reverse_permutation, iterative_fft, reference_forward_fft};
use stockham_cl::sweep::random_input;
use stockham_cl::verify::{compare, DEFAULT_TOLERANCE};
use stockham_cl::{Check, Verifier};

#[test]
fn references_agree_on_random_vectors() {
    let mut rng = StdRng::seed_from_u64(0);
    let verifier = Verifier::default();
    for log2 in 1..=12 {
        let input = random_input(&mut rng, 1 << log2);
        let (_, consistency) = verifier.reference_consistency(&input);
        assert!(consistency.is_ok(), "n = {}: {consistency:?}", 1 << log2);
    }
}

#[test]
fn constant_signal_concentrates_in_dc() {
    let input = vec![0.5f32; 256];
    let out = reference_forward_fft(&input);
    assert!((out[0].re - 128.0).abs() < 1e-4);
    for c in &out[1..] {
        assert!(c.norm() < 1e-4);
    }
}

#[test]
fn real_input_has_hermitian_spectrum() {
    let input = random_input(&mut StdRng::seed_from_u64(3), 64);
    let out = reference_forward_fft(&input);
    for k in 1..32 {
        let a = out[k];
        let b = out[64 - k].conj();
        assert!((a - b).norm() < 1e-4, "bin {k}");
    }
}

proptest! {
    #[test]
    fn iterative_matches_reference(log2 in 1u32..11, seed in any::<u64>()) {
        let input = random_input(&mut StdRng::seed_from_u64(seed), 1 << log2);
        let expected = reference_forward_fft(&input);
        let actual = iterative_fft(&bit_reverse_permutation(&input));
        let outcome = compare(
            Check::ReferenceConsistency,
            &expected,
            &actual,
            DEFAULT_TOLERANCE,
        );
        prop_assert!(outcome.is_ok());
    }

    #[test]
    fn unpermuted_input_is_caught(log2 in 3u32..10, seed in any::<u64>()) {
        // Feeding natural order to the iterative FFT must not pass as consistent.
        let mut input = random_input(&mut StdRng::seed_from_u64(seed), 1 << log2);
        input[1] += 4.0;
        let expected = reference_forward_fft(&input);
        let actual = iterative_fft(&input);
        let outcome = compare(
            Check::ReferenceConsistency,
            &expected,
            &actual,
            DEFAULT_TOLERANCE,
        );
        prop_assert!(outcome.is_err());
    }
}
