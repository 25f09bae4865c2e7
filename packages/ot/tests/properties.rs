//! Algebraic properties of text operations over random inputs

use proptest::prelude::*;
use tandem_ot::TextOperation;

type Step = (u8, usize, String);

/// Build an operation over a string of `len` chars from random steps.
/// Whatever the steps leave untouched at the end is retained.
fn build(len: usize, steps: &[Step]) -> TextOperation {
    let mut op = TextOperation::new();
    let mut remaining = len;
    for (kind, n, text) in steps {
        match kind % 3 {
            0 => {
                let n = (*n).min(remaining);
                op = op.retain(n);
                remaining -= n;
            }
            1 => op = op.insert(text),
            _ => {
                let n = (*n).min(remaining);
                op = op.delete(n);
                remaining -= n;
            }
        }
    }
    op.retain(remaining)
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec((0u8..3, 1usize..6, "[A-Zé]{1,3}"), 0..12)
}

fn text() -> impl Strategy<Value = String> {
    "[a-zñ]{0,24}"
}

proptest! {
    #[test]
    fn apply_yields_target_length(s in text(), a in steps()) {
        let op = build(s.chars().count(), &a);
        let out = op.apply(&s).unwrap();
        prop_assert_eq!(out.chars().count(), op.target_len());
    }

    #[test]
    fn compose_matches_sequential_apply(s in text(), a in steps(), b in steps()) {
        let first = build(s.chars().count(), &a);
        let after_first = first.apply(&s).unwrap();
        let second = build(after_first.chars().count(), &b);

        let sequential = second.apply(&after_first).unwrap();
        let composed = first.compose(&second).unwrap();
        prop_assert_eq!(composed.apply(&s).unwrap(), sequential);
    }

    #[test]
    fn transform_converges(s in text(), a in steps(), b in steps()) {
        let len = s.chars().count();
        let left = build(len, &a);
        let right = build(len, &b);
        let (left_prime, right_prime) = TextOperation::transform(&left, &right).unwrap();

        let via_left = right_prime.apply(&left.apply(&s).unwrap()).unwrap();
        let via_right = left_prime.apply(&right.apply(&s).unwrap()).unwrap();
        prop_assert_eq!(via_left, via_right);
    }

    #[test]
    fn invert_undoes(s in text(), a in steps()) {
        let op = build(s.chars().count(), &a);
        let inverse = op.invert(&s).unwrap();
        prop_assert_eq!(inverse.apply(&op.apply(&s).unwrap()).unwrap(), s);
    }

    #[test]
    fn wire_format_is_stable(s in text(), a in steps()) {
        let op = build(s.chars().count(), &a);
        let json = serde_json::to_string(&op).unwrap();
        let parsed: TextOperation = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed, op);
    }
}
