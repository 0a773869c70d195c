//! The group handle and its blocking collectives.

#[cfg(feature = "tcp")]
use crate::config::Config;
use crate::datatype::{combine_into, decode_into, encode_slice, CollDatatype, DatatypeTag};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::ReduceOp;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use tracing::{debug, trace};

/// A fixed group of cooperating ranks.
///
/// Every collective must be called by every rank of the group, in the same
/// order, with consistent arguments. A `Communicator` can be moved to another
/// thread but not shared between threads, so one process can never have two
/// collectives in flight on the same handle.
///
/// # Example
///
/// ```
/// use ferrocoll::{Communicator, ReduceOp};
///
/// let world = Communicator::local(4).unwrap();
/// let handles: Vec<_> = world
///     .into_iter()
///     .map(|comm| {
///         std::thread::spawn(move || {
///             let send = vec![comm.rank() as f32; 10];
///             let mut recv = vec![0.0f32; 10];
///             comm.allreduce(&send, &mut recv, ReduceOp::Sum).unwrap();
///             recv
///         })
///     })
///     .collect();
/// for h in handles {
///     assert_eq!(h.join().unwrap(), vec![6.0; 10]);
/// }
/// ```
pub struct Communicator {
    transport: Transport,
    rank: i32,
    size: i32,
    verify: bool,
    /// Whether this handle holds the process-wide TCP world slot
    owns_world: bool,
    /// Marker to prevent Sync (one collective in flight per handle)
    _marker: PhantomData<Cell<()>>,
}

impl Communicator {
    /// Create the process-wide communicator from the launch environment.
    ///
    /// Reads the [`launch`](crate::launch) variables, connects to every other
    /// rank and returns once the whole world is connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] when the process was not started by a
    /// launcher, [`Error::AlreadyInitialized`] if a world already exists in
    /// this process, and [`Error::Io`] if the substrate cannot be established.
    #[cfg(feature = "tcp")]
    pub fn create() -> Result<Self> {
        use std::sync::atomic::Ordering;

        let config = Config::from_env()?;
        if crate::WORLD_CREATED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }
        match Self::create_with(config) {
            Ok(mut comm) => {
                comm.owns_world = true;
                Ok(comm)
            }
            Err(e) => {
                crate::WORLD_CREATED.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Create a communicator over TCP from an explicit configuration.
    ///
    /// Unlike [`create`](Self::create) this does not claim the process-wide
    /// world, so a process may hold several such communicators (one per
    /// thread, for instance).
    #[cfg(feature = "tcp")]
    pub fn create_with(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = crate::tcp::bootstrap(&config)?;
        Ok(Self::from_parts(
            transport,
            config.rank(),
            config.size(),
            config.verify(),
        ))
    }

    /// Create `size` connected communicators that live in this process.
    ///
    /// Element `r` of the result is rank `r`. Move each one to its own thread
    /// before calling collectives.
    pub fn local(size: usize) -> Result<Vec<Self>> {
        Self::local_with_verify(size, true)
    }

    /// Like [`local`](Self::local), choosing whether collectives verify each
    /// other's arguments.
    pub fn local_with_verify(size: usize, verify: bool) -> Result<Vec<Self>> {
        if size == 0 || size > i32::MAX as usize {
            return Err(Error::InvalidCount(size as i64));
        }
        Ok(Transport::local(size)
            .into_iter()
            .enumerate()
            .map(|(rank, transport)| Self::from_parts(transport, rank as i32, size as i32, verify))
            .collect())
    }

    fn from_parts(transport: Transport, rank: i32, size: i32, verify: bool) -> Self {
        Communicator {
            transport,
            rank,
            size,
            verify,
            owns_world: false,
            _marker: PhantomData,
        }
    }

    /// Get the rank of the calling process in this communicator.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Get the number of processes in this communicator.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Whether collectives exchange descriptors before moving data.
    pub fn verifies(&self) -> bool {
        self.verify
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Barrier synchronization.
    ///
    /// No rank returns until every rank has entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        self.agree(Descriptor::new(OpKind::Barrier, DatatypeTag::U8, 0, 0, None))?;
        debug!(rank = self.rank, "barrier");

        // Dissemination: ceil(log2 size) rounds
        let mut dist = 1;
        while dist < self.size {
            self.transport
                .send((self.rank + dist) % self.size, Vec::new())?;
            self.transport
                .recv((self.rank - dist + self.size) % self.size)?;
            dist <<= 1;
        }
        Ok(())
    }

    // ========================================================================
    // Blocking Collectives
    // ========================================================================

    /// Broadcast a slice from root to all processes.
    ///
    /// On return every rank's `data` equals root's `data` at the time of the
    /// call.
    ///
    /// # Arguments
    ///
    /// * `data` - Buffer to broadcast (input at root, output at others)
    /// * `root` - Rank of the root process
    pub fn broadcast<T: CollDatatype>(&self, data: &mut [T], root: i32) -> Result<()> {
        self.agree(Descriptor::new(
            OpKind::Broadcast,
            T::TAG,
            data.len(),
            root,
            None,
        ))?;
        debug!(rank = self.rank, root, count = data.len(), "broadcast");

        // Binomial tree over ranks renumbered so that root is 0
        let vrank = self.relative(root);
        let mut mask = 1;
        while mask < self.size {
            if vrank & mask != 0 {
                let parent = self.absolute(vrank - mask, root);
                decode_into(&self.transport.recv(parent)?, data)?;
                break;
            }
            mask <<= 1;
        }

        mask >>= 1;
        let mut payload: Option<Vec<u8>> = None;
        while mask > 0 {
            if vrank + mask < self.size {
                let child = self.absolute(vrank + mask, root);
                let bytes = payload.get_or_insert_with(|| encode_slice(&*data)).clone();
                self.transport.send(child, bytes)?;
            }
            mask >>= 1;
        }
        Ok(())
    }

    /// Reduce values element-wise to the root process.
    ///
    /// # Arguments
    ///
    /// * `send` - Data to send from this process
    /// * `recv` - Buffer for the result, same length as `send` (only significant
    ///   at root; other ranks may pass an empty slice)
    /// * `op` - Reduction operation
    /// * `root` - Rank of the root process
    pub fn reduce<T: CollDatatype>(
        &self,
        send: &[T],
        recv: &mut [T],
        op: ReduceOp,
        root: i32,
    ) -> Result<()> {
        let valid = self.rank != root || send.len() == recv.len();
        self.agree(
            Descriptor::new(OpKind::Reduce, T::TAG, send.len(), root, Some(op)).checked(valid),
        )?;
        debug!(rank = self.rank, root, count = send.len(), ?op, "reduce");

        let vrank = self.relative(root);
        let mut acc = send.to_vec();
        let mut mask = 1;
        while mask < self.size {
            if vrank & mask == 0 {
                let child = vrank | mask;
                if child < self.size {
                    let bytes = self.transport.recv(self.absolute(child, root))?;
                    combine_into(&bytes, &mut acc, op)?;
                }
            } else {
                let parent = self.absolute(vrank & !mask, root);
                self.transport.send(parent, encode_slice(&acc))?;
                break;
            }
            mask <<= 1;
        }

        if self.rank == root {
            recv.copy_from_slice(&acc);
        }
        Ok(())
    }

    /// Reduce a single value to the root process.
    ///
    /// Returns the combined value on root and this rank's own `value` elsewhere.
    pub fn reduce_scalar<T: CollDatatype>(&self, value: T, op: ReduceOp, root: i32) -> Result<T> {
        let send = [value];
        let mut recv = [value];
        self.reduce(&send, &mut recv, op, root)?;
        Ok(recv[0])
    }

    /// All-reduce values (reduce and deliver the result to every rank).
    ///
    /// # Arguments
    ///
    /// * `send` - Data to send from this process
    /// * `recv` - Buffer for result, same length as `send`
    /// * `op` - Reduction operation
    pub fn allreduce<T: CollDatatype>(&self, send: &[T], recv: &mut [T], op: ReduceOp) -> Result<()> {
        let valid = send.len() == recv.len();
        self.agree(
            Descriptor::new(OpKind::Allreduce, T::TAG, send.len(), 0, Some(op)).checked(valid),
        )?;
        debug!(rank = self.rank, count = send.len(), ?op, "allreduce");
        recv.copy_from_slice(send);
        self.ring_allreduce(recv, op)
    }

    /// All-reduce a single value.
    pub fn allreduce_scalar<T: CollDatatype>(&self, value: T, op: ReduceOp) -> Result<T> {
        let mut data = [value];
        self.allreduce_inplace(&mut data, op)?;
        Ok(data[0])
    }

    /// All-reduce values in place.
    ///
    /// Ring reduce-scatter followed by ring all-gather. Each outgoing chunk is
    /// encoded before the matching incoming chunk is folded into `data`, so the
    /// result is the same as [`allreduce`](Self::allreduce) into separate
    /// storage.
    pub fn allreduce_inplace<T: CollDatatype>(&self, data: &mut [T], op: ReduceOp) -> Result<()> {
        self.agree(Descriptor::new(
            OpKind::Allreduce,
            T::TAG,
            data.len(),
            0,
            Some(op),
        ))?;
        debug!(rank = self.rank, count = data.len(), ?op, "allreduce");
        self.ring_allreduce(data, op)
    }

    /// Gather equal-sized contributions to the root process.
    ///
    /// Root receives `send.len() * size` elements, rank `k`'s contribution at
    /// `[k * send.len(), (k + 1) * send.len())`. `recv` is only significant at
    /// root.
    pub fn gather<T: CollDatatype>(&self, send: &[T], recv: &mut [T], root: i32) -> Result<()> {
        let m = send.len();
        let valid = self.rank != root || recv.len() == m * self.size as usize;
        self.agree(Descriptor::new(OpKind::Gather, T::TAG, m, root, None).checked(valid))?;
        debug!(rank = self.rank, root, count = m, "gather");

        if self.rank != root {
            return self.transport.send(root, encode_slice(send));
        }
        for peer in 0..self.size {
            let block = &mut recv[peer as usize * m..(peer as usize + 1) * m];
            if peer == root {
                block.copy_from_slice(send);
            } else {
                decode_into(&self.transport.recv(peer)?, block)?;
            }
        }
        Ok(())
    }

    /// All-gather equal-sized contributions (gather and deliver to every rank).
    ///
    /// `recv` must hold `send.len() * size` elements. On return, segment
    /// `[k * send.len(), (k + 1) * send.len())` holds rank `k`'s `send`.
    pub fn allgather<T: CollDatatype>(&self, send: &[T], recv: &mut [T]) -> Result<()> {
        self.allgather_with_layout(send, recv, 0)
    }

    /// [`allgather`](Self::allgather) that also requires every rank to pass
    /// the same `layout` tag, so callers can check how contributions are
    /// shaped and not just their length.
    pub(crate) fn allgather_with_layout<T: CollDatatype>(
        &self,
        send: &[T],
        recv: &mut [T],
        layout: u64,
    ) -> Result<()> {
        let m = send.len();
        let valid = recv.len() == m * self.size as usize;
        self.agree(
            Descriptor::new(OpKind::Allgather, T::TAG, m, 0, None)
                .with_layout(layout)
                .checked(valid),
        )?;
        debug!(rank = self.rank, count = m, "allgather");

        let rank = self.rank as usize;
        recv[rank * m..(rank + 1) * m].copy_from_slice(send);
        self.ring_allgather(recv, m)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Ring reduce-scatter followed by ring all-gather over `data` in place.
    fn ring_allreduce<T: CollDatatype>(&self, data: &mut [T], op: ReduceOp) -> Result<()> {
        if self.size == 1 {
            return Ok(());
        }

        let n = data.len();
        let size = self.size as usize;
        let rank = self.rank as usize;
        let (left, right) = self.ring_neighbours();

        // After step s this rank has folded s+1 contributions into chunk (rank-s-1).
        for step in 0..size - 1 {
            let out = (rank + size - step) % size;
            let inc = (rank + 2 * size - step - 1) % size;
            trace!(rank, step, out, inc, "reduce-scatter");
            self.transport
                .send(right, encode_slice(&data[chunk(n, size, out)]))?;
            let bytes = self.transport.recv(left)?;
            combine_into(&bytes, &mut data[chunk(n, size, inc)], op)?;
        }

        // Chunk (rank+1) is now complete here; circulate the complete chunks.
        for step in 0..size - 1 {
            let out = (rank + 1 + size - step) % size;
            let inc = (rank + size - step) % size;
            trace!(rank, step, out, inc, "all-gather");
            self.transport
                .send(right, encode_slice(&data[chunk(n, size, out)]))?;
            let bytes = self.transport.recv(left)?;
            decode_into(&bytes, &mut data[chunk(n, size, inc)])?;
        }
        Ok(())
    }

    /// Circulate fixed-size blocks around the ring until every rank holds all
    /// of them. On entry only this rank's block of `buf` needs to be valid.
    fn ring_allgather<T: CollDatatype>(&self, buf: &mut [T], block: usize) -> Result<()> {
        let size = self.size as usize;
        let rank = self.rank as usize;
        let (left, right) = self.ring_neighbours();

        for step in 0..size - 1 {
            let out = (rank + size - step) % size;
            let inc = (rank + 2 * size - step - 1) % size;
            self.transport
                .send(right, encode_slice(&buf[out * block..(out + 1) * block]))?;
            let bytes = self.transport.recv(left)?;
            decode_into(&bytes, &mut buf[inc * block..(inc + 1) * block])?;
        }
        Ok(())
    }

    /// Check that every rank is issuing the same collective with usable
    /// buffers.
    ///
    /// With verification on, all ranks all-gather their descriptors and every
    /// rank applies the same checks to the same table, so they fail together:
    /// the rank with bad buffers gets [`Error::InvalidBuffer`], the others
    /// [`Error::PeerInvalidBuffer`]. Without verification a bad buffer fails
    /// only the local rank.
    fn agree(&self, desc: Descriptor) -> Result<()> {
        if self.verify && self.size > 1 {
            let mut table = vec![0u8; Descriptor::LEN * self.size as usize];
            let at = self.rank as usize * Descriptor::LEN;
            table[at..at + Descriptor::LEN].copy_from_slice(&desc.encode());
            self.ring_allgather(&mut table, Descriptor::LEN)?;

            let peers = table
                .chunks_exact(Descriptor::LEN)
                .map(Descriptor::decode)
                .collect::<Result<Vec<_>>>()?;
            if !desc.valid {
                return Err(Error::InvalidBuffer);
            }
            for (peer, theirs) in peers.iter().enumerate() {
                if !theirs.same_call(&desc) {
                    return Err(Error::Mismatch {
                        rank: peer as i32,
                        expected: desc.to_string(),
                        found: theirs.to_string(),
                    });
                }
            }
            if let Some(peer) = peers.iter().position(|d| !d.valid) {
                return Err(Error::PeerInvalidBuffer { rank: peer as i32 });
            }
        } else if !desc.valid {
            return Err(Error::InvalidBuffer);
        }
        if desc.kind.has_root() {
            Error::check_rank(desc.root, self.size)?;
        }
        Ok(())
    }

    fn ring_neighbours(&self) -> (i32, i32) {
        let left = (self.rank + self.size - 1) % self.size;
        let right = (self.rank + 1) % self.size;
        (left, right)
    }

    /// Rank renumbered so that `root` is 0.
    fn relative(&self, root: i32) -> i32 {
        (self.rank - root + self.size) % self.size
    }

    /// Inverse of [`relative`](Self::relative).
    fn absolute(&self, vrank: i32, root: i32) -> i32 {
        (vrank + root) % self.size
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        #[cfg(feature = "tcp")]
        if self.owns_world {
            crate::WORLD_CREATED.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("verify", &self.verify)
            .finish()
    }
}

/// Bounds of chunk `i` when `len` elements are split into `parts` balanced
/// chunks. Chunks differ in length by at most one and may be empty.
fn chunk(len: usize, parts: usize, i: usize) -> Range<usize> {
    (i * len / parts)..((i + 1) * len / parts)
}

/// Which collective a rank is issuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum OpKind {
    Barrier = 0,
    Broadcast = 1,
    Reduce = 2,
    Allreduce = 3,
    Gather = 4,
    Allgather = 5,
}

impl OpKind {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => OpKind::Barrier,
            1 => OpKind::Broadcast,
            2 => OpKind::Reduce,
            3 => OpKind::Allreduce,
            4 => OpKind::Gather,
            5 => OpKind::Allgather,
            _ => return None,
        })
    }

    fn has_root(self) -> bool {
        matches!(self, OpKind::Broadcast | OpKind::Reduce | OpKind::Gather)
    }

    fn name(self) -> &'static str {
        match self {
            OpKind::Barrier => "barrier",
            OpKind::Broadcast => "broadcast",
            OpKind::Reduce => "reduce",
            OpKind::Allreduce => "allreduce",
            OpKind::Gather => "gather",
            OpKind::Allgather => "allgather",
        }
    }
}

/// What one rank believes the current collective is.
///
/// Wire layout (24 bytes): `u8 kind, u8 dtype, u8 op (0xff = none),
/// u8 flags (bit 0 = local buffers invalid), u32 root, u64 count, u64 layout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Descriptor {
    kind: OpKind,
    dtype: DatatypeTag,
    op: Option<ReduceOp>,
    root: i32,
    count: u64,
    /// Caller-defined shape tag, 0 when unused
    layout: u64,
    /// Whether this rank's buffers fit the call
    valid: bool,
}

impl Descriptor {
    const LEN: usize = 24;

    fn new(kind: OpKind, dtype: DatatypeTag, count: usize, root: i32, op: Option<ReduceOp>) -> Self {
        Descriptor {
            kind,
            dtype,
            op,
            root,
            count: count as u64,
            layout: 0,
            valid: true,
        }
    }

    fn checked(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    fn with_layout(mut self, layout: u64) -> Self {
        self.layout = layout;
        self
    }

    /// Same collective and arguments, ignoring buffer validity.
    fn same_call(&self, other: &Descriptor) -> bool {
        Descriptor {
            valid: true,
            ..*self
        } == Descriptor {
            valid: true,
            ..*other
        }
    }

    fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.kind as u8;
        out[1] = self.dtype as u8;
        out[2] = self.op.map_or(0xff, |op| op as u8);
        out[3] = u8::from(!self.valid);
        out[4..8].copy_from_slice(&self.root.to_le_bytes());
        out[8..16].copy_from_slice(&self.count.to_le_bytes());
        out[16..24].copy_from_slice(&self.layout.to_le_bytes());
        out
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        let bad = |what: &str| Error::Protocol(format!("bad descriptor {what}"));
        if raw.len() != Self::LEN {
            return Err(bad("length"));
        }
        let kind = OpKind::from_u8(raw[0]).ok_or_else(|| bad("kind"))?;
        let dtype = DatatypeTag::from_u8(raw[1]).ok_or_else(|| bad("datatype"))?;
        let op = match raw[2] {
            0xff => None,
            v => Some(ReduceOp::from_u8(v).ok_or_else(|| bad("reduce op"))?),
        };
        let valid = match raw[3] {
            0 => true,
            1 => false,
            _ => return Err(bad("flags")),
        };
        let root = i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let mut count = [0u8; 8];
        count.copy_from_slice(&raw[8..16]);
        let mut layout = [0u8; 8];
        layout.copy_from_slice(&raw[16..24]);
        Ok(Descriptor {
            kind,
            dtype,
            op,
            root,
            count: u64::from_le_bytes(count),
            layout: u64::from_le_bytes(layout),
            valid,
        })
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} x {}", self.kind.name(), self.dtype.name(), self.count)?;
        if self.kind.has_root() {
            write!(f, ", root {}", self.root)?;
        }
        if let Some(op) = self.op {
            write!(f, ", {op:?}")?;
        }
        if self.layout != 0 {
            write!(f, ", layout {:#x}", self.layout)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Run `f` on every rank of a local world and collect results in rank order.
    fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send + 'static,
        F: Fn(Communicator) -> R + Send + Sync + Clone + 'static,
    {
        let handles: Vec<_> = Communicator::local(size)
            .unwrap()
            .into_iter()
            .map(|comm| {
                let f = f.clone();
                thread::spawn(move || f(comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn chunk_partition_covers_range() {
        for len in [0usize, 1, 3, 10, 17] {
            for parts in 1..6 {
                let mut next = 0;
                for i in 0..parts {
                    let r = chunk(len, parts, i);
                    assert_eq!(r.start, next);
                    assert!(r.len() <= len / parts + 1);
                    next = r.end;
                }
                assert_eq!(next, len);
            }
        }
    }

    #[test]
    fn descriptor_wire_layout() {
        let desc = Descriptor::new(OpKind::Reduce, DatatypeTag::F32, 10, 3, Some(ReduceOp::Max));
        let raw = desc.encode();
        assert_eq!(raw[0], 2);
        assert_eq!(raw[1], 0);
        assert_eq!(raw[2], ReduceOp::Max as u8);
        assert_eq!(&raw[4..8], &3i32.to_le_bytes());
        assert_eq!(&raw[8..16], &10u64.to_le_bytes());
        assert_eq!(Descriptor::decode(&raw).unwrap(), desc);

        let none = Descriptor::new(OpKind::Allgather, DatatypeTag::U8, 0, 0, None);
        assert_eq!(none.encode()[2], 0xff);
        assert_eq!(Descriptor::decode(&none.encode()).unwrap(), none);

        let mut bad = raw;
        bad[0] = 42;
        assert!(matches!(Descriptor::decode(&bad), Err(Error::Protocol(_))));
        assert!(Descriptor::decode(&raw[..20]).is_err());

        let shaped = Descriptor::new(OpKind::Allgather, DatatypeTag::F32, 20, 0, None)
            .with_layout(0xabcd)
            .checked(false);
        let raw = shaped.encode();
        assert_eq!(raw[3], 1);
        assert_eq!(&raw[16..24], &0xabcdu64.to_le_bytes());
        assert_eq!(Descriptor::decode(&raw).unwrap(), shaped);
    }

    #[test]
    fn validity_is_not_part_of_the_call() {
        let ok = Descriptor::new(OpKind::Reduce, DatatypeTag::I64, 4, 0, Some(ReduceOp::Sum));
        assert!(ok.same_call(&ok.checked(false)));
        assert!(!ok.same_call(&ok.with_layout(1)));
        assert_eq!(
            ok.with_layout(0x1f).to_string(),
            "reduce(i64 x 4, root 0, Sum, layout 0x1f)"
        );
    }

    #[test]
    fn descriptor_display() {
        let d = Descriptor::new(OpKind::Broadcast, DatatypeTag::F64, 10, 1, None);
        assert_eq!(d.to_string(), "broadcast(f64 x 10, root 1)");
        let d = Descriptor::new(OpKind::Allreduce, DatatypeTag::I32, 4, 0, Some(ReduceOp::Sum));
        assert_eq!(d.to_string(), "allreduce(i32 x 4, Sum)");
    }

    #[test]
    fn relative_and_absolute_are_inverse() {
        let world = Communicator::local(5).unwrap();
        for comm in &world {
            for root in 0..5 {
                let v = comm.relative(root);
                assert_eq!(comm.absolute(v, root), comm.rank());
            }
            assert_eq!(comm.relative(comm.rank()), 0);
        }
    }

    #[test]
    fn local_rejects_empty_world() {
        assert!(matches!(
            Communicator::local(0),
            Err(Error::InvalidCount(0))
        ));
    }

    #[test]
    fn barrier_completes() {
        for size in 1..=5 {
            let results = run(size, |comm| comm.barrier().is_ok());
            assert!(results.into_iter().all(|ok| ok));
        }
    }

    #[test]
    fn gather_to_each_root() {
        let size = 3;
        for root in 0..size as i32 {
            let results = run(size, move |comm| {
                let send = [comm.rank() * 10, comm.rank() * 10 + 1];
                let mut recv = if comm.rank() == root { vec![0; 6] } else { vec![] };
                comm.gather(&send, &mut recv, root).unwrap();
                recv
            });
            assert_eq!(results[root as usize], vec![0, 1, 10, 11, 20, 21]);
        }
    }

    #[test]
    fn scalars() {
        let results = run(4, |comm| {
            let sum = comm.allreduce_scalar(comm.rank() as i64, ReduceOp::Sum).unwrap();
            let max = comm.reduce_scalar(comm.rank() as f64, ReduceOp::Max, 2).unwrap();
            (sum, max)
        });
        for (rank, (sum, max)) in results.into_iter().enumerate() {
            assert_eq!(sum, 6);
            if rank == 2 {
                assert_eq!(max, 3.0);
            } else {
                assert_eq!(max, rank as f64);
            }
        }
    }

    #[test]
    fn unverified_world_still_reduces() {
        let handles: Vec<_> = Communicator::local_with_verify(3, false)
            .unwrap()
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    assert!(!comm.verifies());
                    let mut data = vec![1u32; 7];
                    comm.allreduce_inplace(&mut data, ReduceOp::Sum).unwrap();
                    data
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![3u32; 7]);
        }
    }

    #[test]
    fn unverified_bad_root_fails_locally() {
        let world = Communicator::local_with_verify(2, false).unwrap();
        let mut data = [0.0f32; 3];
        assert!(matches!(
            world[0].broadcast(&mut data, 2),
            Err(Error::InvalidRank { rank: 2, size: 2 })
        ));
    }
}
