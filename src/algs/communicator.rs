//! Thin facade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). Every call
//! is blocking: a send returns once the payload is handed to the transport and
//! a receive returns once the matching message has been copied out. The wave
//! protocol never overlaps communication with local compute, so there are no
//! request handles to wait on.
//!
//! Three backends are provided:
//! - [`NoComm`]: a single-process world for serial runs and unit tests;
//! - [`LocalComm`]: `size` ranks living on threads of one process, sharing a
//!   mailbox (used by the integration tests and the `local_grid` demo). A rank
//!   that aborts or unwinds tears the mailbox down, and every blocked peer gets
//!   [`WaveError::Aborted`];
//! - `MpiComm` (feature `mpi-support`): one rank per MPI process.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::wave_error::WaveError;

/// Typed message tag.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }
    /// Derive a tag `by` steps away, wrapping at `u16::MAX`.
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Blocking communication interface.
///
/// Ranks are local to the communicator. Collective operations (`barrier`,
/// `broadcast`, `all_reduce_or`, `subgroup`) must be entered by every member in
/// the same order.
pub trait Communicator: Sized {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Send `buf` to `peer`.
    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), WaveError>;

    /// Receive a message from `peer` into `buf`; returns the received byte count,
    /// which may be smaller than `buf.len()`.
    fn recv_into(&self, peer: usize, tag: CommTag, buf: &mut [u8]) -> Result<usize, WaveError>;

    fn barrier(&self) -> Result<(), WaveError>;

    /// Broadcast `buf` from `root`; every member must pass the same length.
    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<(), WaveError>;

    /// Bitwise-OR all-reduce of `send` into `recv` (equal lengths on every member).
    fn all_reduce_or(&self, send: &[u8], recv: &mut [u8]) -> Result<(), WaveError>;

    /// Bitwise-OR all-reduce operating on a single buffer.
    ///
    /// The default copies `buf` into a temporary send buffer; backends that can
    /// reduce without it override this.
    fn all_reduce_or_in_place(&self, buf: &mut [u8]) -> Result<(), WaveError> {
        let send = buf.to_vec();
        self.all_reduce_or(&send, buf)
    }

    /// Create the communicator spanning `ranks` (ranks of `self`, in the order
    /// that defines the new ranks). The caller must be one of them.
    fn subgroup(&self, ranks: &[usize]) -> Result<Self, WaveError>;

    /// Tear down the whole job. Peers blocked on this rank must not stay blocked.
    fn abort(&self, code: i32) -> !;
}

fn check_peer(peer: usize, size: usize) -> Result<(), WaveError> {
    if peer < size {
        Ok(())
    } else {
        Err(WaveError::NoPeer { peer, size })
    }
}

// --- NoComm: single process ---

/// Compile-time no-op comm for pure serial runs: one rank, no peers.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn send(&self, peer: usize, _tag: CommTag, _buf: &[u8]) -> Result<(), WaveError> {
        Err(WaveError::NoPeer { peer, size: 1 })
    }
    fn recv_into(&self, peer: usize, _tag: CommTag, _buf: &mut [u8]) -> Result<usize, WaveError> {
        Err(WaveError::NoPeer { peer, size: 1 })
    }
    fn barrier(&self) -> Result<(), WaveError> {
        Ok(())
    }
    fn broadcast(&self, root: usize, _buf: &mut [u8]) -> Result<(), WaveError> {
        check_peer(root, 1)
    }
    fn all_reduce_or(&self, send: &[u8], recv: &mut [u8]) -> Result<(), WaveError> {
        if send.len() != recv.len() {
            return Err(WaveError::ProtocolMismatch {
                peer: 0,
                expected: recv.len(),
                found: send.len(),
            });
        }
        recv.copy_from_slice(send);
        Ok(())
    }
    fn all_reduce_or_in_place(&self, _buf: &mut [u8]) -> Result<(), WaveError> {
        Ok(())
    }
    fn subgroup(&self, ranks: &[usize]) -> Result<Self, WaveError> {
        if ranks == [0] {
            Ok(NoComm)
        } else {
            Err(WaveError::CommunicatorSetup(format!(
                "serial world cannot host group {ranks:?}"
            )))
        }
    }
    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

// --- LocalComm: ranks as threads of one process ---

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Lane {
    PointToPoint,
    Collective,
}

const BARRIER_TAG: CommTag = CommTag::new(1);
const BCAST_TAG: CommTag = CommTag::new(2);
const REDUCE_TAG: CommTag = CommTag::new(3);

type Key = (u64, usize, usize, Lane, u16); // (context, src, dst, lane, tag) in world ranks

/// Exit code recorded when a rank thread unwinds without calling `abort`.
const PANIC_ABORT_CODE: i32 = 101;

#[derive(Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
    /// `(world rank, code)` of the first rank that tore the world down.
    aborted: Mutex<Option<(usize, i32)>>,
    arrived: Condvar,
}

impl Mailbox {
    /// Mark the world as torn down and wake every waiting rank. The first
    /// abort wins.
    fn tear_down(&self, rank: usize, code: i32) {
        let mut aborted = self.aborted.lock();
        aborted.get_or_insert((rank, code));
        self.arrived.notify_all();
    }
}

/// One rank of an in-process world. Create a whole world with [`LocalComm::world`]
/// and move each handle onto its own thread.
pub struct LocalComm {
    mailbox: Arc<Mailbox>,
    context: u64,
    members: Arc<[usize]>,
    rank: usize,
    children: Cell<u64>,
}

impl LocalComm {
    /// Build `size` connected ranks sharing a private mailbox.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::default());
        let members: Arc<[usize]> = (0..size).collect();
        (0..size)
            .map(|rank| LocalComm {
                mailbox: Arc::clone(&mailbox),
                context: 0,
                members: Arc::clone(&members),
                rank,
                children: Cell::new(0),
            })
            .collect()
    }

    /// World rank of this handle.
    pub fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    fn key(&self, src: usize, dst: usize, lane: Lane, tag: CommTag) -> Key {
        (
            self.context,
            self.members[src],
            self.members[dst],
            lane,
            tag.as_u16(),
        )
    }

    fn post(&self, dst: usize, lane: Lane, tag: CommTag, buf: &[u8]) {
        let key = self.key(self.rank, dst, lane, tag);
        self.mailbox
            .slots
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        let _guard = self.mailbox.aborted.lock();
        self.mailbox.arrived.notify_all();
    }

    /// Block until a message for `key` arrives or the world is torn down.
    fn take(&self, src: usize, lane: Lane, tag: CommTag) -> Result<Bytes, WaveError> {
        let key = self.key(src, self.rank, lane, tag);
        let mut aborted = self.mailbox.aborted.lock();
        loop {
            if let Some(msg) = self
                .mailbox
                .slots
                .get_mut(&key)
                .and_then(|mut queue| queue.pop_front())
            {
                return Ok(msg);
            }
            if let Some((rank, code)) = *aborted {
                return Err(WaveError::Aborted { rank, code });
            }
            self.mailbox.arrived.wait(&mut aborted);
        }
    }

    fn take_exact(&self, src: usize, tag: CommTag, buf: &mut [u8]) -> Result<(), WaveError> {
        let msg = self.take(src, Lane::Collective, tag)?;
        crate::algs::wire::expect_exact_len(self.members[src], msg.len(), buf.len())?;
        buf.copy_from_slice(&msg);
        Ok(())
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), WaveError> {
        check_peer(peer, self.size())?;
        self.post(peer, Lane::PointToPoint, tag, buf);
        Ok(())
    }

    fn recv_into(&self, peer: usize, tag: CommTag, buf: &mut [u8]) -> Result<usize, WaveError> {
        check_peer(peer, self.size())?;
        let msg = self.take(peer, Lane::PointToPoint, tag)?;
        if msg.len() > buf.len() {
            // MPI would report MPI_ERR_TRUNCATE here.
            return Err(WaveError::ProtocolMismatch {
                peer: self.members[peer],
                expected: buf.len(),
                found: msg.len(),
            });
        }
        buf[..msg.len()].copy_from_slice(&msg);
        Ok(msg.len())
    }

    fn barrier(&self) -> Result<(), WaveError> {
        if self.rank == 0 {
            for r in 1..self.size() {
                self.take_exact(r, BARRIER_TAG, &mut [])?;
            }
            for r in 1..self.size() {
                self.post(r, Lane::Collective, BARRIER_TAG, &[]);
            }
        } else {
            self.post(0, Lane::Collective, BARRIER_TAG, &[]);
            self.take_exact(0, BARRIER_TAG, &mut [])?;
        }
        Ok(())
    }

    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<(), WaveError> {
        check_peer(root, self.size())?;
        if self.rank == root {
            for r in (0..self.size()).filter(|&r| r != root) {
                self.post(r, Lane::Collective, BCAST_TAG, buf);
            }
            Ok(())
        } else {
            self.take_exact(root, BCAST_TAG, buf)
        }
    }

    fn all_reduce_or(&self, send: &[u8], recv: &mut [u8]) -> Result<(), WaveError> {
        if send.len() != recv.len() {
            return Err(WaveError::ProtocolMismatch {
                peer: self.world_rank(),
                expected: recv.len(),
                found: send.len(),
            });
        }
        recv.copy_from_slice(send);
        self.all_reduce_or_in_place(recv)
    }

    fn all_reduce_or_in_place(&self, buf: &mut [u8]) -> Result<(), WaveError> {
        if self.rank == 0 {
            let mut part = vec![0u8; buf.len()];
            for r in 1..self.size() {
                self.take_exact(r, REDUCE_TAG, &mut part)?;
                for (acc, b) in buf.iter_mut().zip(&part) {
                    *acc |= *b;
                }
            }
            for r in 1..self.size() {
                self.post(r, Lane::Collective, REDUCE_TAG, buf);
            }
            Ok(())
        } else {
            self.post(0, Lane::Collective, REDUCE_TAG, buf);
            self.take_exact(0, REDUCE_TAG, buf)
        }
    }

    fn subgroup(&self, ranks: &[usize]) -> Result<Self, WaveError> {
        let rank = ranks
            .iter()
            .position(|&r| r == self.rank)
            .ok_or_else(|| {
                WaveError::CommunicatorSetup(format!(
                    "rank {} is not part of group {ranks:?}",
                    self.rank
                ))
            })?;
        let mut members = Vec::with_capacity(ranks.len());
        for (i, &r) in ranks.iter().enumerate() {
            if r >= self.size() || ranks[..i].contains(&r) {
                return Err(WaveError::CommunicatorSetup(format!(
                    "invalid member {r} in group {ranks:?}"
                )));
            }
            members.push(self.members[r]);
        }
        // Every member creates groups in the same order, so the creation index
        // names the same child context on all of them. Groups created at the
        // same index must be disjoint, as with MPI_Comm_create.
        let seq = self.children.get();
        self.children.set(seq + 1);
        Ok(LocalComm {
            mailbox: Arc::clone(&self.mailbox),
            context: self
                .context
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(seq + 1),
            members: members.into(),
            rank,
            children: Cell::new(0),
        })
    }

    fn abort(&self, code: i32) -> ! {
        self.mailbox.tear_down(self.world_rank(), code);
        panic!(
            "rank {} of the local world aborted with code {code}",
            self.world_rank()
        )
    }
}

impl Drop for LocalComm {
    // A rank that unwinds can never reach its next collective; release its peers.
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.mailbox.tear_down(self.world_rank(), PANIC_ABORT_CODE);
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use std::rc::Rc;

    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::Communicator as MpiCommunicator;
    use mpi::traits::{CommunicatorCollectives, Destination, Equivalence, Group, Root, Source};

    use super::{CommTag, Communicator, check_peer};
    use crate::wave_error::WaveError;

    /// One rank of an MPI communicator.
    ///
    /// Sub-communicators share the universe handle so MPI is finalized only
    /// after the last communicator has been freed.
    pub struct MpiComm {
        pub comm: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Option<Rc<Universe>>,
    }

    impl MpiComm {
        /// Initialize MPI (or attach to an already initialized world).
        pub fn new() -> Result<Self, WaveError> {
            let (comm, universe) = match mpi::initialize() {
                Some(universe) => {
                    let world = universe.world();
                    (world, Some(Rc::new(universe)))
                }
                None => (SimpleCommunicator::world(), None),
            };
            Ok(Self::wrap(comm, universe))
        }

        fn wrap(comm: SimpleCommunicator, universe: Option<Rc<Universe>>) -> Self {
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Self {
                comm,
                rank,
                size,
                _universe: universe,
            }
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), WaveError> {
            check_peer(peer, self.size)?;
            self.comm
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag.as_i32());
            Ok(())
        }

        fn recv_into(&self, peer: usize, tag: CommTag, buf: &mut [u8]) -> Result<usize, WaveError> {
            check_peer(peer, self.size)?;
            let status = self
                .comm
                .process_at_rank(peer as i32)
                .receive_into_with_tag(buf, tag.as_i32());
            Ok(status.count(u8::equivalent_datatype()) as usize)
        }

        fn barrier(&self) -> Result<(), WaveError> {
            self.comm.barrier();
            Ok(())
        }

        fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<(), WaveError> {
            check_peer(root, self.size)?;
            self.comm.process_at_rank(root as i32).broadcast_into(buf);
            Ok(())
        }

        fn all_reduce_or(&self, send: &[u8], recv: &mut [u8]) -> Result<(), WaveError> {
            if send.len() != recv.len() {
                return Err(WaveError::ProtocolMismatch {
                    peer: self.rank,
                    expected: recv.len(),
                    found: send.len(),
                });
            }
            self.comm
                .all_reduce_into(send, recv, SystemOperation::bitwise_or());
            Ok(())
        }

        fn subgroup(&self, ranks: &[usize]) -> Result<Self, WaveError> {
            let ranks_i32: Vec<i32> = ranks.iter().map(|&r| r as i32).collect();
            let group = self.comm.group().include(&ranks_i32);
            let comm = self
                .comm
                .split_by_subgroup_collective(&group)
                .ok_or_else(|| {
                    WaveError::CommunicatorSetup(format!(
                        "MPI_Comm_create returned no communicator for rank {} in {ranks:?}",
                        self.rank
                    ))
                })?;
            Ok(Self::wrap(comm, self._universe.clone()))
        }

        fn abort(&self, code: i32) -> ! {
            self.comm.abort(code)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn commtag_offset_wraps() {
        let t = CommTag::new(u16::MAX).offset(1);
        assert_eq!(t.as_u16(), 0);
        assert_eq!(CommTag::new(5).offset(2).as_i32(), 7);
    }

    #[test]
    fn local_roundtrip_two_ranks() {
        let mut world = LocalComm::world(2);
        let comm1 = world.pop().unwrap();
        let comm0 = world.pop().unwrap();

        let receiver = thread::spawn(move || {
            let mut buf = [0u8; 8];
            let n = comm1.recv_into(0, CommTag::new(7), &mut buf).unwrap();
            buf[..n].to_vec()
        });
        comm0.send(1, CommTag::new(7), &[1, 2, 3, 4]).unwrap();
        assert_eq!(receiver.join().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn local_messages_do_not_overtake() {
        let mut world = LocalComm::world(2);
        let comm1 = world.pop().unwrap();
        let comm0 = world.pop().unwrap();
        comm0.send(1, CommTag::new(0), &[1]).unwrap();
        comm0.send(1, CommTag::new(0), &[2]).unwrap();
        let mut buf = [0u8; 1];
        comm1.recv_into(0, CommTag::new(0), &mut buf).unwrap();
        assert_eq!(buf, [1]);
        comm1.recv_into(0, CommTag::new(0), &mut buf).unwrap();
        assert_eq!(buf, [2]);
    }

    #[test]
    fn local_recv_rejects_oversized_message() {
        let mut world = LocalComm::world(2);
        let comm1 = world.pop().unwrap();
        let comm0 = world.pop().unwrap();
        comm0.send(1, CommTag::new(3), &[0; 4]).unwrap();
        let mut small = [0u8; 2];
        let err = comm1.recv_into(0, CommTag::new(3), &mut small).unwrap_err();
        assert!(matches!(
            err,
            WaveError::ProtocolMismatch { expected: 2, found: 4, .. }
        ));
    }

    #[test]
    fn local_collectives_agree() {
        let results: Vec<(Vec<u8>, Vec<u8>)> = thread::scope(|s| {
            let handles: Vec<_> = LocalComm::world(4)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mine = [1u8 << comm.rank(), 0];
                        let mut reduced = [0u8; 2];
                        comm.all_reduce_or(&mine, &mut reduced).unwrap();
                        let mut in_place = [0u8, 1u8 << comm.rank()];
                        comm.all_reduce_or_in_place(&mut in_place).unwrap();
                        assert_eq!(in_place, [0, 0b1111]);
                        comm.barrier().unwrap();
                        let mut shared = if comm.rank() == 2 { [9u8, 8] } else { [0u8; 2] };
                        comm.broadcast(2, &mut shared).unwrap();
                        (reduced.to_vec(), shared.to_vec())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (reduced, shared) in results {
            assert_eq!(reduced, vec![0b1111, 0]);
            assert_eq!(shared, vec![9, 8]);
        }
    }

    #[test]
    fn local_subgroups_are_isolated() {
        // Two disjoint pairs broadcast different values at the same time.
        let results: Vec<(usize, u8)> = thread::scope(|s| {
            let handles: Vec<_> = LocalComm::world(4)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let pair = if comm.rank() < 2 { [0, 1] } else { [2, 3] };
                        let sub = comm.subgroup(&pair).unwrap();
                        let mut v = [if sub.rank() == 0 { comm.rank() as u8 + 10 } else { 0 }];
                        sub.broadcast(0, &mut v).unwrap();
                        (comm.rank(), v[0])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (rank, v) in results {
            assert_eq!(v, if rank < 2 { 10 } else { 12 });
        }
    }

    #[test]
    fn subgroup_requires_membership() {
        let world = LocalComm::world(3);
        assert!(matches!(
            world[0].subgroup(&[1, 2]),
            Err(WaveError::CommunicatorSetup(_))
        ));
        assert!(world[0].subgroup(&[0, 0]).is_err());
    }

    #[test]
    fn abort_releases_blocked_peers() {
        let mut world = LocalComm::world(2);
        let comm1 = world.pop().unwrap();
        let comm0 = world.pop().unwrap();
        let (started_tx, started_rx) = mpsc::channel();

        let waiter = thread::spawn(move || {
            started_tx.send(()).unwrap();
            let mut buf = [0u8; 4];
            comm1.recv_into(0, CommTag::new(9), &mut buf)
        });
        started_rx.recv().unwrap();
        let aborter = thread::spawn(move || {
            comm0.abort(7);
        });

        assert!(aborter.join().is_err());
        assert!(matches!(
            waiter.join().unwrap(),
            Err(WaveError::Aborted { rank: 0, code: 7 })
        ));
    }

    #[test]
    fn panicking_rank_tears_the_world_down() {
        let results: Vec<thread::Result<Result<(), WaveError>>> = thread::scope(|s| {
            let handles: Vec<_> = LocalComm::world(3)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        if comm.rank() == 2 {
                            panic!("rank 2 failed before the barrier");
                        }
                        comm.barrier()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });
        assert!(results[2].is_err());
        for survivor in &results[..2] {
            assert!(matches!(
                survivor,
                Ok(Err(WaveError::Aborted { rank: 2, code: PANIC_ABORT_CODE }))
            ));
        }
    }

    #[test]
    fn nocomm_is_a_single_rank_world() {
        let c = NoComm;
        assert_eq!((c.rank(), c.size()), (0, 1));
        assert!(c.barrier().is_ok());
        let mut out = [0u8; 2];
        c.all_reduce_or(&[3, 4], &mut out).unwrap();
        assert_eq!(out, [3, 4]);
        assert!(c.subgroup(&[0]).is_ok());
        assert!(matches!(c.send(1, CommTag::new(0), &[]), Err(WaveError::NoPeer { .. })));
    }
}
