//! Operator-level collectives over shaped buffers.
//!
//! A graph executor drives collectives one operator at a time: it hands over a
//! communicator created by [`create_common_world`], one or more input
//! [`Tensor`]s and the operator's arguments, and expects output tensors whose
//! shape follows from the inputs. The functions here are those operator
//! contracts; the data movement is [`Communicator`]'s.
//!
//! | Operator | Function | Output shape |
//! |----------|----------|--------------|
//! | create common world | [`create_common_world`] | — |
//! | constant fill | [`constant_fill`] | as given |
//! | broadcast | [`broadcast`] | input (written in place) |
//! | reduce | [`reduce`] | input, root only |
//! | all-gather | [`allgather`] | input with leading dimension × size |
//! | all-reduce | [`allreduce`], [`allreduce_inplace`] | input |
//!
//! Reductions use [`ReduceOp::Sum`]; the `*_with` variants take the op.

use crate::comm::Communicator;
use crate::datatype::CollDatatype;
use crate::error::{Error, Result};
use crate::ReduceOp;

/// A dense row-major buffer with a shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: CollDatatype> Tensor<T> {
    /// Wrap `data` with `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBuffer`] if `data.len()` is not the product of
    /// `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return Err(Error::InvalidBuffer);
        }
        Ok(Tensor { shape, data })
    }

    /// A tensor of `shape` with every element set to `value`.
    pub fn constant(shape: Vec<usize>, value: T) -> Self {
        let len = shape.iter().product();
        Tensor {
            shape,
            data: vec![value; len],
        }
    }

    /// A tensor of `shape` filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::constant(shape, T::zero())
    }

    /// The shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Size of dimension `axis`.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.shape.get(axis).copied()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor has no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The elements in row-major order.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the elements.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Take the elements out.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }
}

/// Create the process-wide communicator from the launch environment.
#[cfg(feature = "tcp")]
pub fn create_common_world() -> Result<Communicator> {
    Communicator::create()
}

/// A tensor of `shape` filled with `value`.
pub fn constant_fill<T: CollDatatype>(shape: &[usize], value: T) -> Tensor<T> {
    Tensor::constant(shape.to_vec(), value)
}

/// Broadcast `x` from `root`, overwriting `x` on every other rank.
pub fn broadcast<T: CollDatatype>(comm: &Communicator, x: &mut Tensor<T>, root: i32) -> Result<()> {
    comm.broadcast(x.data_mut(), root)
}

/// Sum `x` over all ranks into a new tensor on `root`.
///
/// Returns `Some` on root and `None` elsewhere.
pub fn reduce<T: CollDatatype>(
    comm: &Communicator,
    x: &Tensor<T>,
    root: i32,
) -> Result<Option<Tensor<T>>> {
    reduce_with(comm, x, ReduceOp::Sum, root)
}

/// [`reduce`] with an explicit operation.
pub fn reduce_with<T: CollDatatype>(
    comm: &Communicator,
    x: &Tensor<T>,
    op: ReduceOp,
    root: i32,
) -> Result<Option<Tensor<T>>> {
    if comm.rank() == root {
        let mut out = Tensor::zeros(x.shape.clone());
        comm.reduce(x.data(), out.data_mut(), op, root)?;
        Ok(Some(out))
    } else {
        comm.reduce(x.data(), &mut [], op, root)?;
        Ok(None)
    }
}

/// Concatenate `x` from every rank along the leading dimension, in rank order.
///
/// An input of shape `[d0, d1, ...]` yields `[d0 * size, d1, ...]`; a scalar
/// (shape `[]`) yields `[size]`. Every rank must pass the same shape. With
/// verification on, differing trailing dimensions fail with
/// [`Error::Mismatch`] on every rank; without it, matching shapes are the
/// caller's responsibility.
pub fn allgather<T: CollDatatype>(comm: &Communicator, x: &Tensor<T>) -> Result<Tensor<T>> {
    let size = comm.size() as usize;
    let mut shape = x.shape.clone();
    match shape.first_mut() {
        Some(leading) => *leading *= size,
        None => shape.push(size),
    }
    let mut out = Tensor::zeros(shape);
    comm.allgather_with_layout(x.data(), out.data_mut(), row_layout(&x.shape))?;
    Ok(out)
}

/// FNV-1a fingerprint of every dimension after the leading one.
fn row_layout(shape: &[usize]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    shape
        .iter()
        .skip(1)
        .flat_map(|&d| (d as u64).to_le_bytes())
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

/// Sum `x` over all ranks into a new tensor on every rank.
pub fn allreduce<T: CollDatatype>(comm: &Communicator, x: &Tensor<T>) -> Result<Tensor<T>> {
    allreduce_with(comm, x, ReduceOp::Sum)
}

/// [`allreduce`] with an explicit operation.
pub fn allreduce_with<T: CollDatatype>(
    comm: &Communicator,
    x: &Tensor<T>,
    op: ReduceOp,
) -> Result<Tensor<T>> {
    let mut out = Tensor::zeros(x.shape.clone());
    comm.allreduce(x.data(), out.data_mut(), op)?;
    Ok(out)
}

/// Sum `x` over all ranks, writing the result back into `x`.
pub fn allreduce_inplace<T: CollDatatype>(comm: &Communicator, x: &mut Tensor<T>) -> Result<()> {
    allreduce_inplace_with(comm, x, ReduceOp::Sum)
}

/// [`allreduce_inplace`] with an explicit operation.
pub fn allreduce_inplace_with<T: CollDatatype>(
    comm: &Communicator,
    x: &mut Tensor<T>,
    op: ReduceOp,
) -> Result<()> {
    comm.allreduce_inplace(x.data_mut(), op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_layout_ignores_leading_dimension() {
        assert_eq!(row_layout(&[2, 10]), row_layout(&[7, 10]));
        assert_eq!(row_layout(&[]), row_layout(&[5]));
        assert_ne!(row_layout(&[2, 10]), row_layout(&[4, 5]));
        assert_ne!(row_layout(&[1, 2, 3]), row_layout(&[1, 3, 2]));
    }

    #[test]
    fn tensor_checks_shape() {
        assert!(Tensor::new(vec![2, 3], vec![0.0f32; 6]).is_ok());
        assert!(matches!(
            Tensor::new(vec![2, 3], vec![0.0f32; 5]),
            Err(Error::InvalidBuffer)
        ));
        let scalar = Tensor::new(vec![], vec![1u8]).unwrap();
        assert_eq!(scalar.len(), 1);
    }

    #[test]
    fn constant_fill_shape() {
        let x = constant_fill(&[2, 10], 3.0f32);
        assert_eq!(x.shape(), &[2, 10]);
        assert_eq!(x.dim(1), Some(10));
        assert_eq!(x.dim(2), None);
        assert_eq!(x.len(), 20);
        assert!(x.data().iter().all(|&v| v == 3.0));
        assert!(constant_fill(&[0, 4], 1i32).is_empty());
    }

    #[test]
    fn single_rank_ops_are_identity() {
        let world = Communicator::local(1).unwrap();
        let comm = &world[0];
        let x = Tensor::new(vec![2, 2], vec![1.0f64, 2.0, 3.0, 4.0]).unwrap();

        let mut b = x.clone();
        broadcast(comm, &mut b, 0).unwrap();
        assert_eq!(b, x);
        assert_eq!(reduce(comm, &x, 0).unwrap(), Some(x.clone()));
        assert_eq!(allreduce(comm, &x).unwrap(), x);
        assert_eq!(allgather(comm, &x).unwrap(), x);

        let mut y = x.clone();
        allreduce_inplace(comm, &mut y).unwrap();
        assert_eq!(y, x);

        let s = Tensor::new(vec![], vec![7u32]).unwrap();
        assert_eq!(allgather(comm, &s).unwrap().shape(), &[1]);
    }
}
