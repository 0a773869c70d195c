//! Element datatype trait, type tags and wire encoding.
//!
//! This module provides the [`CollDatatype`] trait, a sealed trait that maps Rust
//! primitive types to a stable type tag, a little-endian wire encoding and the
//! element-wise combine used by reductions.
//!
//! # Supported Types
//!
//! | Rust Type | Tag Value | Width |
//! |-----------|-----------|-------|
//! | `f32`     | 0         | 4     |
//! | `f64`     | 1         | 8     |
//! | `i32`     | 2         | 4     |
//! | `i64`     | 3         | 8     |
//! | `u8`      | 4         | 1     |
//! | `u32`     | 5         | 4     |
//! | `u64`     | 6         | 8     |

use crate::error::{Error, Result};
use crate::ReduceOp;

/// Seals `CollDatatype` against outside implementations.
mod sealed {
    pub trait Sealed {}
}

/// Tag values carried in operation descriptors.
///
/// These discriminants are part of the wire format and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DatatypeTag {
    /// 32-bit floating point
    F32 = 0,
    /// 64-bit floating point
    F64 = 1,
    /// 32-bit signed integer
    I32 = 2,
    /// 64-bit signed integer
    I64 = 3,
    /// 8-bit unsigned integer
    U8 = 4,
    /// 32-bit unsigned integer
    U32 = 5,
    /// 64-bit unsigned integer
    U64 = 6,
}

impl DatatypeTag {
    /// Decode a tag from its wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => DatatypeTag::F32,
            1 => DatatypeTag::F64,
            2 => DatatypeTag::I32,
            3 => DatatypeTag::I64,
            4 => DatatypeTag::U8,
            5 => DatatypeTag::U32,
            6 => DatatypeTag::U64,
            _ => return None,
        })
    }

    /// Rust name of the element type.
    pub fn name(self) -> &'static str {
        match self {
            DatatypeTag::F32 => "f32",
            DatatypeTag::F64 => "f64",
            DatatypeTag::I32 => "i32",
            DatatypeTag::I64 => "i64",
            DatatypeTag::U8 => "u8",
            DatatypeTag::U32 => "u32",
            DatatypeTag::U64 => "u64",
        }
    }
}

/// Trait for types that can be used in collective operations.
///
/// This is a **sealed trait**: it cannot be implemented outside this crate.
/// Supported types: [`f32`], [`f64`], [`i32`], [`i64`], [`u8`], [`u32`], [`u64`].
///
/// # Example
///
/// ```
/// use ferrocoll::{CollDatatype, ReduceOp};
///
/// assert_eq!(3.0f64.combine(4.0, ReduceOp::Sum), 7.0);
/// assert_eq!(3i32.combine(4, ReduceOp::Max), 4);
/// ```
pub trait CollDatatype: sealed::Sealed + Copy + Send + PartialEq + std::fmt::Debug + 'static {
    /// The datatype tag carried in operation descriptors.
    const TAG: DatatypeTag;

    /// Encoded width in bytes.
    const WIDTH: usize;

    /// The value `0` of this type.
    fn zero() -> Self;

    /// Combine two values with a reduction operation.
    ///
    /// Integer `Sum` and `Prod` wrap on overflow.
    fn combine(self, other: Self, op: ReduceOp) -> Self;

    /// Append the little-endian encoding of `values` to `out`.
    fn encode(values: &[Self], out: &mut Vec<u8>);

    /// Decode one little-endian value from exactly `WIDTH` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_coll_datatype {
    ($ty:ty, $tag:expr, $zero:expr, $sum:expr, $prod:expr, $max:expr, $min:expr) => {
        impl sealed::Sealed for $ty {}
        impl CollDatatype for $ty {
            const TAG: DatatypeTag = $tag;
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn zero() -> Self {
                $zero
            }

            fn combine(self, other: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => $sum(self, other),
                    ReduceOp::Prod => $prod(self, other),
                    ReduceOp::Max => $max(self, other),
                    ReduceOp::Min => $min(self, other),
                }
            }

            fn encode(values: &[Self], out: &mut Vec<u8>) {
                out.reserve(values.len() * Self::WIDTH);
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }

            fn decode(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

macro_rules! impl_float {
    ($ty:ty, $tag:expr) => {
        impl_coll_datatype!(
            $ty,
            $tag,
            0.0,
            |a: $ty, b: $ty| a + b,
            |a: $ty, b: $ty| a * b,
            <$ty>::max,
            <$ty>::min
        );
    };
}

macro_rules! impl_int {
    ($ty:ty, $tag:expr) => {
        impl_coll_datatype!(
            $ty,
            $tag,
            0,
            <$ty>::wrapping_add,
            <$ty>::wrapping_mul,
            <$ty as Ord>::max,
            <$ty as Ord>::min
        );
    };
}

impl_float!(f32, DatatypeTag::F32);
impl_float!(f64, DatatypeTag::F64);
impl_int!(i32, DatatypeTag::I32);
impl_int!(i64, DatatypeTag::I64);
impl_int!(u8, DatatypeTag::U8);
impl_int!(u32, DatatypeTag::U32);
impl_int!(u64, DatatypeTag::U64);

/// Encode a slice into a fresh frame payload.
pub(crate) fn encode_slice<T: CollDatatype>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::WIDTH);
    T::encode(values, &mut out);
    out
}

/// Decode a payload of exactly `out.len()` elements into `out`.
pub(crate) fn decode_into<T: CollDatatype>(bytes: &[u8], out: &mut [T]) -> Result<()> {
    check_payload::<T>(bytes, out.len())?;
    for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(T::WIDTH)) {
        *slot = T::decode(chunk);
    }
    Ok(())
}

/// Decode a payload of exactly `acc.len()` elements, folding it into `acc`.
///
/// Incoming values are the right-hand operand: `acc[i] = op(acc[i], incoming[i])`.
pub(crate) fn combine_into<T: CollDatatype>(bytes: &[u8], acc: &mut [T], op: ReduceOp) -> Result<()> {
    check_payload::<T>(bytes, acc.len())?;
    for (slot, chunk) in acc.iter_mut().zip(bytes.chunks_exact(T::WIDTH)) {
        *slot = slot.combine(T::decode(chunk), op);
    }
    Ok(())
}

fn check_payload<T: CollDatatype>(bytes: &[u8], count: usize) -> Result<()> {
    if bytes.len() != count * T::WIDTH {
        return Err(Error::Protocol(format!(
            "expected {count} x {} ({} bytes), got {} bytes",
            T::TAG.name(),
            count * T::WIDTH,
            bytes.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_are_stable() {
        assert_eq!(f32::TAG as u8, 0);
        assert_eq!(f64::TAG as u8, 1);
        assert_eq!(i32::TAG as u8, 2);
        assert_eq!(i64::TAG as u8, 3);
        assert_eq!(u8::TAG as u8, 4);
        assert_eq!(u32::TAG as u8, 5);
        assert_eq!(u64::TAG as u8, 6);
    }

    #[test]
    fn tag_from_u8_inverts_discriminant() {
        for v in 0u8..7 {
            let tag = DatatypeTag::from_u8(v).unwrap();
            assert_eq!(tag as u8, v);
        }
        assert_eq!(DatatypeTag::from_u8(7), None);
        assert_eq!(DatatypeTag::from_u8(255), None);
    }

    #[test]
    fn widths() {
        assert_eq!(f32::WIDTH, 4);
        assert_eq!(f64::WIDTH, 8);
        assert_eq!(u8::WIDTH, 1);
        assert_eq!(i64::WIDTH, 8);
    }

    #[test]
    fn combine_float_ops() {
        assert_eq!(1.5f32.combine(2.0, ReduceOp::Sum), 3.5);
        assert_eq!(1.5f32.combine(2.0, ReduceOp::Prod), 3.0);
        assert_eq!((-1.0f64).combine(2.0, ReduceOp::Max), 2.0);
        assert_eq!((-1.0f64).combine(2.0, ReduceOp::Min), -1.0);
    }

    #[test]
    fn combine_int_wraps() {
        assert_eq!(250u8.combine(10, ReduceOp::Sum), 4);
        assert_eq!(i32::MAX.combine(1, ReduceOp::Sum), i32::MIN);
        assert_eq!(7u64.combine(3, ReduceOp::Min), 3);
        assert_eq!((-7i64).combine(3, ReduceOp::Max), 3);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let bytes = encode_slice(&[1.0f64, 2.0, 3.0]);
        let mut out = [0.0f64; 2];
        assert!(matches!(decode_into(&bytes, &mut out), Err(Error::Protocol(_))));
    }

    #[test]
    fn combine_into_folds_incoming() {
        let bytes = encode_slice(&[10i32, 20, 30]);
        let mut acc = [1i32, 2, 3];
        combine_into(&bytes, &mut acc, ReduceOp::Sum).unwrap();
        assert_eq!(acc, [11, 22, 33]);
    }

    #[test]
    fn trait_is_implemented() {
        fn assert_coll_datatype<T: CollDatatype>() {}
        assert_coll_datatype::<f32>();
        assert_coll_datatype::<f64>();
        assert_coll_datatype::<i32>();
        assert_coll_datatype::<i64>();
        assert_coll_datatype::<u8>();
        assert_coll_datatype::<u32>();
        assert_coll_datatype::<u64>();
    }
}
