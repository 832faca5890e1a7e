//! Operational Transform for linear text content.
//!
//! `transform(a, b)` rewrites two operations made concurrently on the same
//! base so that either application order converges:
//!
//! ```text
//!            base
//!           ╱    ╲
//!          a      b
//!         ╱        ╲
//!   apply(a)      apply(b)
//!        │          │
//!        b'         a'
//!         ╲        ╱
//!        same content
//! ```
//!
//! `a` is always the operation submitted first; it wins position ties.
//! Text-changing operations are treated as splices `(position, deleted, text)`
//! so insert, delete and replace share one set of rules. Format operations
//! only annotate a range: their range is mapped through the other operation and
//! they never move anything themselves.
//!
//! Reference: Ellis & Gibbs, Concurrency Control in Groupware Systems (1989)

use uuid::Uuid;

use crate::operation::{Operation, OperationKind, MAX_SPAN};

/// Transform two concurrent operations. `a` was submitted before `b`.
///
/// Returns `(a', b')` where `a'` applies after `b` and `b'` applies after `a`.
pub fn transform(a: &Operation, b: &Operation) -> (Operation, Operation) {
    match (a.changes_text(), b.changes_text()) {
        (false, false) => (derived(a), derived(b)),
        (false, true) => (map_format(a, b), derived(b)),
        (true, false) => (derived(a), map_format(b, a)),
        (true, true) => transform_splices(a, b),
    }
}

/// Rewrite `incoming` so it applies after every operation in `applied`.
///
/// `applied` must be in submission order and every entry must have been
/// submitted before `incoming`.
pub fn transform_against<'a, I>(incoming: &Operation, applied: I) -> Operation
where
    I: IntoIterator<Item = &'a Operation>,
{
    let mut current = incoming.clone();
    for earlier in applied {
        let (_, rewritten) = transform(earlier, &current);
        current = rewritten;
    }
    current
}

fn transform_splices(a: &Operation, b: &Operation) -> (Operation, Operation) {
    // Positions past MAX_SPAN are out of bounds anyway; `apply` rejects them.
    let (pa, la, ta) = (a.position.min(MAX_SPAN), a.deleted_len(), a.text());
    let (pb, lb, tb) = (b.position.min(MAX_SPAN), b.deleted_len(), b.text());
    let (na, nb) = (a.inserted_len(), b.inserted_len());
    let a_end = pa + la;
    let b_end = pb + lb;

    // a entirely before b (equal insert points resolve in a's favour)
    if a_end <= pb {
        let b_prime = reshaped(b, pb - la + na, lb, tb);
        return (reshaped(a, pa, la, ta), b_prime);
    }

    // b entirely before a
    if b_end <= pa {
        let a_prime = reshaped(a, pa - lb + nb, la, ta);
        return (a_prime, reshaped(b, pb, lb, tb));
    }

    // a is a pure insert strictly inside b's deleted range: b swallows it
    if la == 0 {
        let a_prime = reshaped(a, pb, 0, "");
        let b_prime = reshaped(b, pb, lb + na, tb);
        return (a_prime, b_prime);
    }

    // b is a pure insert strictly inside a's deleted range
    if lb == 0 {
        let a_prime = reshaped(a, pa, la + nb, ta);
        let b_prime = reshaped(b, pa, 0, "");
        return (a_prime, b_prime);
    }

    // Overlapping ranges: both sides delete the union and the surviving text is
    // a's followed by b's. A range contained in the other collapses to a no-op
    // delete.
    let u0 = pa.min(pb);
    let u1 = a_end.max(b_end);
    let span = u1 - u0;
    let mut combined = String::with_capacity(ta.len() + tb.len());
    combined.push_str(ta);
    combined.push_str(tb);

    let a_prime = reshaped(a, u0, span - lb + nb, &combined);
    let b_prime = reshaped(b, u0, span - la + na, &combined);
    (a_prime, b_prime)
}

/// Map a format range through a text-changing operation.
fn map_format(format: &Operation, edit: &Operation) -> Operation {
    let p = edit.position.min(MAX_SPAN);
    let l = edit.deleted_len();
    let n = edit.inserted_len();
    let s = format.position.min(MAX_SPAN);
    let e = s + format.range_len();

    let start = if s < p {
        s
    } else if s >= p + l {
        s - l + n
    } else {
        p + n
    };
    let end = if e <= p {
        e
    } else if e >= p + l {
        e - l + n
    } else {
        p
    };

    let mut out = derived(format);
    out.position = start;
    out.length = Some(end.saturating_sub(start));
    out
}

/// Build the transformed instance of `op` as a splice `(position, len, text)`.
///
/// Inserts stay inserts while they delete nothing, deletes stay deletes while
/// they insert nothing; everything else becomes a replace.
fn reshaped(op: &Operation, position: usize, len: usize, text: &str) -> Operation {
    let kind = match op.kind {
        OperationKind::Insert if len == 0 => OperationKind::Insert,
        OperationKind::Insert | OperationKind::Delete if text.is_empty() => OperationKind::Delete,
        _ => OperationKind::Replace,
    };

    let mut out = derived(op);
    out.kind = kind;
    out.position = position;
    out.length = match kind {
        OperationKind::Insert => None,
        _ => Some(len),
    };
    out.content = match kind {
        OperationKind::Delete => None,
        _ => Some(text.to_string()),
    };
    out
}

/// Clone with a fresh id; transformed operations are new instances.
fn derived(op: &Operation) -> Operation {
    let mut out = op.clone();
    out.id = Uuid::new_v4();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{apply, Attributes};

    fn user() -> Uuid {
        Uuid::new_v4()
    }

    /// Apply both orders and assert they converge; returns the result.
    fn converge(base: &str, a: &Operation, b: &Operation) -> String {
        let (a_prime, b_prime) = transform(a, b);
        let left = apply(&apply(base, a).unwrap(), &b_prime).unwrap();
        let right = apply(&apply(base, b).unwrap(), &a_prime).unwrap();
        assert_eq!(left, right, "diverged on base {base:?}: a={a:?} b={b:?}");
        left
    }

    #[test]
    fn test_insert_insert_same_position_earlier_wins() {
        let a = Operation::insert(user(), 0, "foo");
        let b = Operation::insert(user(), 0, "bar");
        let (_, b_prime) = transform(&a, &b);
        assert_eq!(b_prime.position, 3);
        assert_eq!(converge("", &a, &b), "foobar");

        // Reversed submission order flips the result.
        assert_eq!(converge("", &b, &a), "barfoo");
    }

    #[test]
    fn test_insert_insert_larger_position_shifts() {
        let a = Operation::insert(user(), 5, "XX");
        let b = Operation::insert(user(), 1, "y");
        let (a_prime, b_prime) = transform(&a, &b);
        assert_eq!(a_prime.position, 6);
        assert_eq!(b_prime.position, 1);
        assert_eq!(converge("abcdefg", &a, &b), "aybcdeXXfg");
    }

    #[test]
    fn test_insert_before_delete_shifts_delete() {
        let a = Operation::insert(user(), 1, "zz");
        let b = Operation::delete(user(), 3, 2);
        let (_, b_prime) = transform(&a, &b);
        assert_eq!(b_prime.position, 5);
        assert_eq!(b_prime.length, Some(2));
        assert_eq!(converge("abcdefg", &a, &b), "azzbcfg");
    }

    #[test]
    fn test_insert_inside_delete_grows_delete() {
        let a = Operation::insert(user(), 3, "XYZ");
        let b = Operation::delete(user(), 1, 4);
        let (a_prime, b_prime) = transform(&a, &b);
        assert_eq!(b_prime.length, Some(7));
        assert!(a_prime.is_noop());
        assert_eq!(converge("abcdefg", &a, &b), "afg");
    }

    #[test]
    fn test_delete_then_insert_mirror() {
        let a = Operation::delete(user(), 1, 4);
        let b = Operation::insert(user(), 3, "XYZ");
        let (a_prime, b_prime) = transform(&a, &b);
        assert_eq!(a_prime.length, Some(7));
        assert!(b_prime.is_noop());
        assert_eq!(converge("abcdefg", &a, &b), "afg");
    }

    #[test]
    fn test_insert_after_delete_shifts_left() {
        let a = Operation::delete(user(), 0, 2);
        let b = Operation::insert(user(), 5, "!");
        let (_, b_prime) = transform(&a, &b);
        assert_eq!(b_prime.position, 3);
        assert_eq!(converge("abcdefg", &a, &b), "cde!fg");
    }

    #[test]
    fn test_overlapping_deletes_merge_to_union() {
        let a = Operation::delete(user(), 1, 3);
        let b = Operation::delete(user(), 2, 4);
        assert_eq!(converge("abcdefgh", &a, &b), "agh");
    }

    #[test]
    fn test_contained_delete_becomes_noop() {
        let a = Operation::delete(user(), 1, 5);
        let b = Operation::delete(user(), 2, 2);
        let (a_prime, b_prime) = transform(&a, &b);
        assert_eq!(b_prime.kind, OperationKind::Delete);
        assert_eq!(b_prime.length, Some(0));
        assert_eq!(a_prime.length, Some(3));
        assert_eq!(converge("abcdefgh", &a, &b), "agh");
    }

    #[test]
    fn test_overlapping_replaces_keep_both_texts() {
        let a = Operation::replace(user(), 0, 3, "A");
        let b = Operation::replace(user(), 2, 3, "B");
        assert_eq!(converge("abcdefg", &a, &b), "ABfg");
    }

    #[test]
    fn test_adjacent_deletes_do_not_merge() {
        let a = Operation::delete(user(), 0, 2);
        let b = Operation::delete(user(), 2, 2);
        let (_, b_prime) = transform(&a, &b);
        assert_eq!(b_prime.position, 0);
        assert_eq!(b_prime.length, Some(2));
        assert_eq!(converge("abcdef", &a, &b), "ef");
    }

    #[test]
    fn test_format_range_maps_through_insert() {
        let mut attrs = Attributes::new();
        attrs.insert("bold".into(), "true".into());
        let fmt = Operation::format(user(), 2, 4, attrs);
        let ins = Operation::insert(user(), 3, "xx");

        let (fmt_prime, ins_prime) = transform(&fmt, &ins);
        assert_eq!(fmt_prime.position, 2);
        assert_eq!(fmt_prime.length, Some(6));
        assert_eq!(ins_prime.position, 3);
        converge("abcdefgh", &fmt, &ins);
    }

    #[test]
    fn test_format_range_collapses_under_delete() {
        let attrs = Attributes::new();
        let fmt = Operation::format(user(), 2, 2, attrs);
        let del = Operation::delete(user(), 1, 5);
        let (_, fmt_prime) = transform(&del, &fmt);
        assert_eq!(fmt_prime.position, 1);
        assert_eq!(fmt_prime.length, Some(0));
    }

    #[test]
    fn test_delete_to_end_swallows_concurrent_append() {
        let del = Operation::delete(user(), 1, usize::MAX);
        let ins = Operation::insert(user(), 2, "x");
        assert_eq!(converge("abc", &del, &ins), "a");
        assert_eq!(converge("abc", &ins, &del), "a");
    }

    #[test]
    fn test_huge_ranges_do_not_overflow() {
        let mut attrs = Attributes::new();
        attrs.insert("bold".into(), "true".into());
        let fmt = Operation::format(user(), 0, usize::MAX, attrs);
        let del = Operation::delete(user(), 1, usize::MAX);
        let rep = Operation::replace(user(), 2, usize::MAX, "yz");
        let far = Operation::insert(user(), usize::MAX, "x");

        converge("abcdef", &fmt, &del);
        converge("abcdef", &del, &rep);
        converge("abcdef", &rep, &del);

        // Out-of-bounds positions survive transformation and fail on apply.
        let head = Operation::insert(user(), 0, "q");
        let (_, far_prime) = transform(&head, &far);
        assert!(apply("qabc", &far_prime).is_err());
    }

    #[test]
    fn test_transformed_ops_get_fresh_ids() {
        let a = Operation::insert(user(), 0, "a");
        let b = Operation::insert(user(), 0, "b");
        let (a_prime, b_prime) = transform(&a, &b);
        assert_ne!(a_prime.id, a.id);
        assert_ne!(b_prime.id, b.id);
        assert_eq!(a_prime.author_id, a.author_id);
    }

    #[test]
    fn test_transform_against_sequence() {
        // Two ops already applied in order, a third concurrent with both.
        let base = "hello";
        let first = Operation::insert(user(), 0, ">> ");
        let after_first = apply(base, &first).unwrap();
        let second = Operation::insert(user(), 8, "!");
        let after_second = apply(&after_first, &second).unwrap();
        assert_eq!(after_second, ">> hello!");

        let incoming = Operation::delete(user(), 0, 1);
        let rewritten = transform_against(&incoming, [&first, &second]);
        assert_eq!(apply(&after_second, &rewritten).unwrap(), ">> ello!");
    }
}
