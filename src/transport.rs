//! Point-to-point links between the ranks of a world.
//!
//! A [`Transport`] holds one FIFO link to every other rank. Collectives only
//! ever talk to a peer through [`Transport::send`] and [`Transport::recv`];
//! matching is purely by call order, so every link must deliver frames in the
//! order they were sent.
//!
//! Receiving is always from an in-memory channel. For the local substrate the
//! peer's sender writes into it directly; for the TCP substrate a reader thread
//! per socket drains frames into it, so a send never waits on the peer reading.

use crate::error::{Error, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::trace;

#[cfg(feature = "tcp")]
use std::net::{Shutdown, TcpStream};
#[cfg(feature = "tcp")]
use std::thread::JoinHandle;

/// Sending half of a link.
enum LinkTx {
    Local(Sender<Vec<u8>>),
    #[cfg(feature = "tcp")]
    Tcp(TcpStream),
}

/// A FIFO link to one peer.
struct Link {
    tx: LinkTx,
    rx: Receiver<Vec<u8>>,
}

/// The set of links owned by one rank.
pub(crate) struct Transport {
    rank: i32,
    links: Vec<Option<Link>>,
    #[cfg(feature = "tcp")]
    readers: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Build a fully connected world of `size` ranks inside this process.
    pub(crate) fn local(size: usize) -> Vec<Transport> {
        // senders[from][to] feeds receivers[to][from]
        let mut senders: Vec<Vec<Option<Sender<Vec<u8>>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Vec<u8>>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();

        for from in 0..size {
            for to in 0..size {
                if from != to {
                    let (tx, rx) = mpsc::channel();
                    senders[from][to] = Some(tx);
                    receivers[to][from] = Some(rx);
                }
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (txs, rxs))| {
                let links = txs
                    .into_iter()
                    .zip(rxs)
                    .map(|(tx, rx)| match (tx, rx) {
                        (Some(tx), Some(rx)) => Some(Link {
                            tx: LinkTx::Local(tx),
                            rx,
                        }),
                        _ => None,
                    })
                    .collect();
                Transport {
                    rank: rank as i32,
                    links,
                    #[cfg(feature = "tcp")]
                    readers: Vec::new(),
                }
            })
            .collect()
    }

    /// Wrap connected sockets, one per peer (`None` at this rank's own index).
    ///
    /// Spawns one reader thread per socket.
    #[cfg(feature = "tcp")]
    pub(crate) fn from_streams(rank: i32, streams: Vec<Option<TcpStream>>) -> Result<Self> {
        let mut links = Vec::with_capacity(streams.len());
        let mut readers = Vec::new();

        for (peer, stream) in streams.into_iter().enumerate() {
            let Some(stream) = stream else {
                links.push(None);
                continue;
            };
            stream.set_nodelay(true)?;
            let reader = stream.try_clone()?;
            let (tx, rx) = mpsc::channel();
            let handle = std::thread::Builder::new()
                .name(format!("ferrocoll-rx-{rank}-{peer}"))
                .spawn(move || {
                    crate::tcp::pump_frames(reader, tx, peer as i32, crate::tcp::MAX_FRAME_LEN)
                })?;
            readers.push(handle);
            links.push(Some(Link {
                tx: LinkTx::Tcp(stream),
                rx,
            }));
        }

        Ok(Transport {
            rank,
            links,
            readers,
        })
    }

    fn link(&self, peer: i32) -> Result<&Link> {
        usize::try_from(peer)
            .ok()
            .and_then(|p| self.links.get(p))
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidRank {
                rank: peer,
                size: self.links.len() as i32,
            })
    }

    /// Queue a frame for `peer`. Never waits for the peer to receive it.
    pub(crate) fn send(&self, peer: i32, payload: Vec<u8>) -> Result<()> {
        trace!(rank = self.rank, peer, bytes = payload.len(), "send");
        match &self.link(peer)?.tx {
            LinkTx::Local(tx) => tx.send(payload).map_err(|_| Error::Disconnected { peer }),
            #[cfg(feature = "tcp")]
            LinkTx::Tcp(stream) => crate::tcp::write_frame(stream, &payload).map_err(Error::from),
        }
    }

    /// Block until the next frame from `peer` arrives.
    pub(crate) fn recv(&self, peer: i32) -> Result<Vec<u8>> {
        let payload = self
            .link(peer)?
            .rx
            .recv()
            .map_err(|_| Error::Disconnected { peer })?;
        trace!(rank = self.rank, peer, bytes = payload.len(), "recv");
        Ok(payload)
    }
}

#[cfg(feature = "tcp")]
impl Drop for Transport {
    fn drop(&mut self) {
        for link in self.links.iter().flatten() {
            if let LinkTx::Tcp(stream) = &link.tx {
                // Unblocks the reader thread; the peer may already be gone.
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        for handle in self.readers.drain(..) {
            let _ = handle.join();
        }
    }
}
