//! # Text Operations
//!
//! A `TextOperation` walks a string from start to end. Each component either
//! keeps (`Retain`), adds (`Insert`) or removes (`Delete`) characters.
//!
//! ```text
//! "abc"  --[insert("X"), retain(3)]-->  "Xabc"
//! "abc"  --[retain(2), delete(1)]---->  "ab"
//! ```
//!
//! Lengths are counted in Unicode scalar values.
//!
//! Components are kept canonical: adjacent components of the same kind are
//! merged and an insert is always placed before an adjacent delete. Two
//! operations with the same effect therefore compare equal.

use crate::OtError;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Single component of a text operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Retain(usize),
    Insert(String),
    Delete(usize),
}

/// Ordered list of retain/insert/delete components
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextOperation {
    ops: Vec<Op>,

    /// Length of the string this operation applies to
    base_len: usize,

    /// Length of the string this operation produces
    target_len: usize,
}

impl TextOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw components, canonicalizing as it goes
    pub fn from_ops(ops: impl IntoIterator<Item = Op>) -> Self {
        let mut operation = Self::new();
        for op in ops {
            operation.push(op);
        }
        operation
    }

    /// Skip over `n` characters
    pub fn retain(mut self, n: usize) -> Self {
        self.add_retain(n);
        self
    }

    /// Insert `text` at the current position
    pub fn insert(mut self, text: impl AsRef<str>) -> Self {
        self.add_insert(text.as_ref());
        self
    }

    /// Delete `n` characters at the current position
    pub fn delete(mut self, n: usize) -> Self {
        self.add_delete(n);
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn base_len(&self) -> usize {
        self.base_len
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// True when applying the operation leaves every string unchanged
    pub fn is_noop(&self) -> bool {
        matches!(self.ops.as_slice(), [] | [Op::Retain(_)])
    }

    fn push(&mut self, op: Op) {
        match op {
            Op::Retain(n) => self.add_retain(n),
            Op::Insert(text) => self.add_insert(&text),
            Op::Delete(n) => self.add_delete(n),
        }
    }

    fn add_retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.base_len += n;
        self.target_len += n;
        if let Some(Op::Retain(last)) = self.ops.last_mut() {
            *last += n;
        } else {
            self.ops.push(Op::Retain(n));
        }
    }

    fn add_insert(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.target_len += char_len(text);

        if let Some(Op::Insert(last)) = self.ops.last_mut() {
            last.push_str(text);
            return;
        }

        // Insert goes in front of a trailing delete
        let len = self.ops.len();
        if let Some(Op::Delete(_)) = self.ops.last() {
            if len >= 2 {
                if let Op::Insert(previous) = &mut self.ops[len - 2] {
                    previous.push_str(text);
                    return;
                }
            }
            self.ops.insert(len - 1, Op::Insert(text.to_string()));
            return;
        }

        self.ops.push(Op::Insert(text.to_string()));
    }

    fn add_delete(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.base_len += n;
        if let Some(Op::Delete(last)) = self.ops.last_mut() {
            *last += n;
        } else {
            self.ops.push(Op::Delete(n));
        }
    }

    /// Apply to `text`, producing the edited string
    pub fn apply(&self, text: &str) -> Result<String, OtError> {
        self.check_base(text)?;

        let mut output = String::with_capacity(text.len());
        let mut chars = text.chars();
        for op in &self.ops {
            match op {
                Op::Retain(n) => output.extend(chars.by_ref().take(*n)),
                Op::Insert(inserted) => output.push_str(inserted),
                Op::Delete(n) => {
                    chars.by_ref().take(*n).for_each(drop);
                }
            }
        }
        Ok(output)
    }

    /// Operation that reverts this one.
    ///
    /// `text` is the string this operation was applied to.
    pub fn invert(&self, text: &str) -> Result<TextOperation, OtError> {
        self.check_base(text)?;

        let mut inverse = TextOperation::new();
        let mut chars = text.chars();
        for op in &self.ops {
            match op {
                Op::Retain(n) => {
                    inverse.add_retain(*n);
                    chars.by_ref().take(*n).for_each(drop);
                }
                Op::Insert(inserted) => inverse.add_delete(char_len(inserted)),
                Op::Delete(n) => {
                    let removed: String = chars.by_ref().take(*n).collect();
                    inverse.add_insert(&removed);
                }
            }
        }
        Ok(inverse)
    }

    /// Combine `self` followed by `other` into one operation
    pub fn compose(&self, other: &TextOperation) -> Result<TextOperation, OtError> {
        if self.target_len != other.base_len {
            return Err(OtError::ComposeLengthMismatch {
                first_target: self.target_len,
                second_base: other.base_len,
            });
        }

        let mut composed = TextOperation::new();
        let mut first = self.ops.iter().cloned();
        let mut second = other.ops.iter().cloned();
        let mut op1 = first.next();
        let mut op2 = second.next();

        loop {
            match (op1.take(), op2.take()) {
                (None, None) => break,

                (Some(Op::Delete(n)), pending) => {
                    composed.add_delete(n);
                    op1 = first.next();
                    op2 = pending;
                }
                (pending, Some(Op::Insert(text))) => {
                    composed.add_insert(&text);
                    op1 = pending;
                    op2 = second.next();
                }

                (None, Some(_)) => {
                    return Err(OtError::Incompatible("first operation is too short"))
                }
                (Some(_), None) => {
                    return Err(OtError::Incompatible("first operation is too long"))
                }

                (Some(Op::Retain(a)), Some(Op::Retain(b))) => match a.cmp(&b) {
                    Ordering::Greater => {
                        composed.add_retain(b);
                        op1 = Some(Op::Retain(a - b));
                        op2 = second.next();
                    }
                    Ordering::Equal => {
                        composed.add_retain(a);
                        op1 = first.next();
                        op2 = second.next();
                    }
                    Ordering::Less => {
                        composed.add_retain(a);
                        op1 = first.next();
                        op2 = Some(Op::Retain(b - a));
                    }
                },

                (Some(Op::Insert(text)), Some(Op::Delete(b))) => {
                    let len = char_len(&text);
                    match len.cmp(&b) {
                        Ordering::Greater => {
                            let (_, rest) = split_at_char(&text, b);
                            op1 = Some(Op::Insert(rest.to_string()));
                            op2 = second.next();
                        }
                        Ordering::Equal => {
                            op1 = first.next();
                            op2 = second.next();
                        }
                        Ordering::Less => {
                            op1 = first.next();
                            op2 = Some(Op::Delete(b - len));
                        }
                    }
                }

                (Some(Op::Insert(text)), Some(Op::Retain(b))) => {
                    let len = char_len(&text);
                    match len.cmp(&b) {
                        Ordering::Greater => {
                            let (head, rest) = split_at_char(&text, b);
                            composed.add_insert(head);
                            op1 = Some(Op::Insert(rest.to_string()));
                            op2 = second.next();
                        }
                        Ordering::Equal => {
                            composed.add_insert(&text);
                            op1 = first.next();
                            op2 = second.next();
                        }
                        Ordering::Less => {
                            composed.add_insert(&text);
                            op1 = first.next();
                            op2 = Some(Op::Retain(b - len));
                        }
                    }
                }

                (Some(Op::Retain(a)), Some(Op::Delete(b))) => match a.cmp(&b) {
                    Ordering::Greater => {
                        composed.add_delete(b);
                        op1 = Some(Op::Retain(a - b));
                        op2 = second.next();
                    }
                    Ordering::Equal => {
                        composed.add_delete(b);
                        op1 = first.next();
                        op2 = second.next();
                    }
                    Ordering::Less => {
                        composed.add_delete(a);
                        op1 = first.next();
                        op2 = Some(Op::Delete(b - a));
                    }
                },
            }
        }

        Ok(composed)
    }

    /// Transform two concurrent operations against each other.
    ///
    /// Returns `(a', b')` with `apply(apply(s, a), b') == apply(apply(s, b), a')`.
    /// When both insert at the same position, `a`'s insert lands first.
    pub fn transform(
        a: &TextOperation,
        b: &TextOperation,
    ) -> Result<(TextOperation, TextOperation), OtError> {
        if a.base_len != b.base_len {
            return Err(OtError::TransformLengthMismatch {
                left: a.base_len,
                right: b.base_len,
            });
        }

        let mut a_prime = TextOperation::new();
        let mut b_prime = TextOperation::new();
        let mut first = a.ops.iter().cloned();
        let mut second = b.ops.iter().cloned();
        let mut op1 = first.next();
        let mut op2 = second.next();

        loop {
            match (op1.take(), op2.take()) {
                (None, None) => break,

                (Some(Op::Insert(text)), pending) => {
                    b_prime.add_retain(char_len(&text));
                    a_prime.add_insert(&text);
                    op1 = first.next();
                    op2 = pending;
                }
                (pending, Some(Op::Insert(text))) => {
                    a_prime.add_retain(char_len(&text));
                    b_prime.add_insert(&text);
                    op1 = pending;
                    op2 = second.next();
                }

                (None, Some(_)) => {
                    return Err(OtError::Incompatible("first operation is too short"))
                }
                (Some(_), None) => {
                    return Err(OtError::Incompatible("first operation is too long"))
                }

                (Some(Op::Retain(x)), Some(Op::Retain(y))) => {
                    let n = x.min(y);
                    a_prime.add_retain(n);
                    b_prime.add_retain(n);
                    (op1, op2) = advance(x, y, Op::Retain, Op::Retain, &mut first, &mut second);
                }

                // Both sides removed the same characters; nothing to emit
                (Some(Op::Delete(x)), Some(Op::Delete(y))) => {
                    (op1, op2) = advance(x, y, Op::Delete, Op::Delete, &mut first, &mut second);
                }

                (Some(Op::Delete(x)), Some(Op::Retain(y))) => {
                    a_prime.add_delete(x.min(y));
                    (op1, op2) = advance(x, y, Op::Delete, Op::Retain, &mut first, &mut second);
                }

                (Some(Op::Retain(x)), Some(Op::Delete(y))) => {
                    b_prime.add_delete(x.min(y));
                    (op1, op2) = advance(x, y, Op::Retain, Op::Delete, &mut first, &mut second);
                }
            }
        }

        Ok((a_prime, b_prime))
    }

    fn check_base(&self, text: &str) -> Result<(), OtError> {
        let actual = char_len(text);
        if actual != self.base_len {
            return Err(OtError::BaseLengthMismatch {
                expected: self.base_len,
                actual,
            });
        }
        Ok(())
    }
}

/// Consume `min(x, y)` from two length components, returning what is left
fn advance<I: Iterator<Item = Op>>(
    x: usize,
    y: usize,
    left: fn(usize) -> Op,
    right: fn(usize) -> Op,
    first: &mut I,
    second: &mut I,
) -> (Option<Op>, Option<Op>) {
    match x.cmp(&y) {
        Ordering::Greater => (Some(left(x - y)), second.next()),
        Ordering::Equal => (first.next(), second.next()),
        Ordering::Less => (first.next(), Some(right(y - x))),
    }
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_at_char(text: &str, n: usize) -> (&str, &str) {
    let index = text
        .char_indices()
        .nth(n)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    text.split_at(index)
}

// Wire format: retain = positive integer, delete = negative integer, insert = string

impl Serialize for TextOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.ops.len()))?;
        for op in &self.ops {
            match op {
                Op::Retain(n) => seq.serialize_element(&(*n as i64))?,
                Op::Insert(text) => seq.serialize_element(text)?,
                Op::Delete(n) => seq.serialize_element(&-(*n as i64))?,
            }
        }
        seq.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOp {
    Count(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for TextOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<RawOp>::deserialize(deserializer)?;
        let mut operation = TextOperation::new();
        for op in raw {
            match op {
                RawOp::Count(0) => {
                    return Err(de::Error::custom("zero-length component in text operation"))
                }
                RawOp::Count(n) => {
                    let len = counted_len(&operation, n).map_err(<D::Error as de::Error>::custom)?;
                    if n > 0 {
                        operation.add_retain(len);
                    } else {
                        operation.add_delete(len);
                    }
                }
                RawOp::Text(text) => {
                    operation
                        .target_len
                        .checked_add(char_len(&text))
                        .ok_or_else(|| {
                            <D::Error as de::Error>::custom(OtError::Invalid(
                                "insert overflows the target length".into(),
                            ))
                        })?;
                    operation.add_insert(&text);
                }
            }
        }
        Ok(operation)
    }
}

/// Length of a wire retain/delete count, refusing counts that would overflow
/// the lengths accumulated so far
fn counted_len(operation: &TextOperation, count: i64) -> Result<usize, OtError> {
    let len = usize::try_from(count.unsigned_abs())
        .map_err(|_| OtError::Invalid(format!("component length {} is out of range", count)))?;
    let fits = operation.base_len.checked_add(len).is_some()
        && (count < 0 || operation.target_len.checked_add(len).is_some());
    if !fits {
        return Err(OtError::Invalid(format!(
            "component length {} overflows the operation length",
            count
        )));
    }
    Ok(len)
}
