//! TCP substrate: framing and world bootstrap.
//!
//! Every frame is a little-endian `u64` byte length followed by the payload.
//!
//! Bootstrap runs in two phases:
//!
//! 1. **Rendezvous.** Rank 0 listens on the configured address. Every other
//!    rank binds its own listener on an ephemeral port, connects to rank 0 and
//!    registers `(rank, port)`. Rank 0 answers each of them with the address
//!    table of the whole world. The registration socket stays open as the
//!    link between rank 0 and that rank.
//! 2. **Mesh.** Rank `r > 0` connects to every rank in `1..r` (announcing its
//!    rank) and accepts one connection from every rank in `r+1..size`.
//!
//! Connecting before accepting cannot deadlock: a peer's listener is bound
//! before it registers, so the kernel completes the connection even while
//! that peer is still busy connecting elsewhere.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::Transport;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pause between connection attempts and accept polls during bootstrap.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Largest frame accepted while bootstrapping (registration, address table,
/// mesh handshake).
const BOOTSTRAP_FRAME_LIMIT: u64 = 1 << 20;

/// Largest data frame a reader thread accepts.
pub(crate) const MAX_FRAME_LEN: u64 = 1 << 40;

/// Payload bytes reserved up front; larger frames grow as data arrives.
const PREALLOC_LIMIT: u64 = 1 << 20;

/// Write one frame.
pub(crate) fn write_frame(mut stream: &TcpStream, payload: &[u8]) -> io::Result<()> {
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame)
}

/// Read one frame of at most `limit` payload bytes. Returns `None` on a clean
/// end of stream.
///
/// A header announcing more than `limit` bytes is rejected with
/// [`ErrorKind::InvalidData`] before anything is allocated.
pub(crate) fn read_frame(stream: &mut impl Read, limit: u64) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 8];
    match stream.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u64::from_le_bytes(header);
    if len > limit || usize::try_from(len).is_err() {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the limit of {limit}"),
        ));
    }
    let mut payload = Vec::with_capacity(len.min(PREALLOC_LIMIT) as usize);
    stream.by_ref().take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("frame truncated after {} of {len} bytes", payload.len()),
        ));
    }
    Ok(Some(payload))
}

/// Reader thread body: forward frames from `stream` until it closes.
pub(crate) fn pump_frames(mut stream: TcpStream, tx: Sender<Vec<u8>>, peer: i32, limit: u64) {
    loop {
        match read_frame(&mut stream, limit) {
            Ok(Some(frame)) => {
                if tx.send(frame).is_err() {
                    // Transport dropped
                    return;
                }
            }
            Ok(None) => {
                debug!(peer, "link closed");
                return;
            }
            Err(e) => {
                if !matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::NotConnected
                ) {
                    warn!(peer, error = %e, "link read failed");
                }
                return;
            }
        }
    }
}

/// Read one bootstrap frame, giving up at `deadline`.
fn expect_frame(stream: &mut TcpStream, what: &str, deadline: Instant) -> Result<Vec<u8>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    stream.set_read_timeout(Some(remaining.max(POLL_INTERVAL)))?;
    let frame = read_frame(stream, BOOTSTRAP_FRAME_LIMIT)
        .map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                Error::Launch(format!("timed out waiting for {what}"))
            }
            ErrorKind::InvalidData => Error::Protocol(format!("bad {what}: {e}")),
            _ => Error::Io(e),
        })?
        .ok_or_else(|| Error::Protocol(format!("connection closed while waiting for {what}")))?;
    stream.set_read_timeout(None)?;
    Ok(frame)
}

fn encode_hello(rank: i32, port: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&(rank as u32).to_le_bytes());
    out.extend_from_slice(&port.to_le_bytes());
    out
}

fn decode_hello(frame: &[u8]) -> Result<(i32, u16)> {
    if frame.len() != 6 {
        return Err(Error::Protocol(format!(
            "registration frame has {} bytes, expected 6",
            frame.len()
        )));
    }
    let rank = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as i32;
    let port = u16::from_le_bytes([frame[4], frame[5]]);
    Ok((rank, port))
}

fn decode_rank(frame: &[u8]) -> Result<i32> {
    match frame {
        [a, b, c, d] => Ok(u32::from_le_bytes([*a, *b, *c, *d]) as i32),
        _ => Err(Error::Protocol(format!(
            "mesh handshake has {} bytes, expected 4",
            frame.len()
        ))),
    }
}

pub(crate) fn encode_table(addrs: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(addrs.len() as u32).to_le_bytes());
    for addr in addrs {
        out.extend_from_slice(&(addr.len() as u16).to_le_bytes());
        out.extend_from_slice(addr.as_bytes());
    }
    out
}

pub(crate) fn decode_table(frame: &[u8]) -> Result<Vec<String>> {
    let truncated = || Error::Protocol("truncated address table".into());
    let (count, mut rest) = frame.split_first_chunk::<4>().ok_or_else(truncated)?;
    let count = u32::from_le_bytes(*count) as usize;
    let mut addrs = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, tail) = rest.split_first_chunk::<2>().ok_or_else(truncated)?;
        let len = u16::from_le_bytes(*len) as usize;
        if tail.len() < len {
            return Err(truncated());
        }
        let (addr, tail) = tail.split_at(len);
        let addr = std::str::from_utf8(addr)
            .map_err(|_| Error::Protocol("address table is not UTF-8".into()))?;
        addrs.push(addr.to_string());
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(Error::Protocol("trailing bytes after address table".into()));
    }
    Ok(addrs)
}

fn resolve(addr: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|e| Error::Launch(format!("cannot resolve {addr}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::Launch(format!("{addr} resolves to no address")));
    }
    Ok(addrs)
}

/// Connect to `addr`, retrying until `deadline` while the peer is not up yet.
fn connect_until(addr: &str, deadline: Instant) -> Result<TcpStream> {
    let targets = resolve(addr)?;
    loop {
        let mut last_err = None;
        for target in &targets {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match TcpStream::connect_timeout(target, remaining.max(POLL_INTERVAL)) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        if Instant::now() >= deadline {
            return Err(Error::Launch(format!(
                "could not connect to {addr}: {}",
                last_err.map_or_else(|| "timed out".to_string(), |e| e.to_string())
            )));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Accept one connection, giving up at `deadline`.
fn accept_until(listener: &TcpListener, deadline: Instant) -> Result<TcpStream> {
    listener.set_nonblocking(true)?;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::Launch(
                        "timed out waiting for peers to connect".into(),
                    ));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn place(slots: &mut [Option<TcpStream>], rank: i32, stream: TcpStream) -> Result<()> {
    let size = slots.len() as i32;
    let slot = usize::try_from(rank)
        .ok()
        .and_then(|r| slots.get_mut(r))
        .ok_or(Error::InvalidRank { rank, size })?;
    if slot.is_some() {
        return Err(Error::Protocol(format!("rank {rank} connected twice")));
    }
    *slot = Some(stream);
    Ok(())
}

/// Establish the full mesh described by `config`.
pub(crate) fn bootstrap(config: &Config) -> Result<Transport> {
    let rank = config.rank();
    let size = config.size() as usize;
    let deadline = Instant::now() + config.connect_timeout();
    let mut streams: Vec<Option<TcpStream>> = (0..size).map(|_| None).collect();

    if size == 1 {
        return Transport::from_streams(rank, streams);
    }

    if rank == 0 {
        let listener = TcpListener::bind(config.addr())
            .map_err(|e| Error::Launch(format!("cannot listen on {}: {e}", config.addr())))?;
        info!(addr = %config.addr(), size, "waiting for ranks to register");

        let mut table = vec![String::new(); size];
        table[0] = config.addr().to_string();
        for _ in 1..size {
            let mut stream = accept_until(&listener, deadline)?;
            let ip: IpAddr = stream.peer_addr()?.ip();
            let (peer, port) = decode_hello(&expect_frame(&mut stream, "registration", deadline)?)?;
            if peer == 0 {
                return Err(Error::Protocol("a second process claims rank 0".into()));
            }
            place(&mut streams, peer, stream)?;
            table[peer as usize] = SocketAddr::new(ip, port).to_string();
            debug!(peer, addr = %table[peer as usize], "rank registered");
        }

        let frame = encode_table(&table);
        for stream in streams.iter().flatten() {
            write_frame(stream, &frame)?;
        }
    } else {
        let listener = TcpListener::bind(("0.0.0.0", 0))?;
        let port = listener.local_addr()?.port();

        let mut root = connect_until(config.addr(), deadline)?;
        write_frame(&root, &encode_hello(rank, port))?;
        let table = decode_table(&expect_frame(&mut root, "address table", deadline)?)?;
        if table.len() != size {
            return Err(Error::Launch(format!(
                "rank 0 reports a world of {} ranks, this process expects {size}",
                table.len()
            )));
        }
        streams[0] = Some(root);

        for peer in 1..rank as usize {
            let stream = connect_until(&table[peer], deadline)?;
            write_frame(&stream, &(rank as u32).to_le_bytes())?;
            streams[peer] = Some(stream);
        }
        for _ in rank as usize + 1..size {
            let mut stream = accept_until(&listener, deadline)?;
            let peer = decode_rank(&expect_frame(&mut stream, "mesh handshake", deadline)?)?;
            if peer <= rank {
                return Err(Error::Protocol(format!(
                    "rank {peer} connected to rank {rank} out of order"
                )));
            }
            place(&mut streams, peer, stream)?;
        }
    }

    info!(rank, size, "tcp world established");
    Transport::from_streams(rank, streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_layout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        write_frame(&client, b"abc").unwrap();
        write_frame(&client, b"").unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server, 16).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(read_frame(&mut server, 16).unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut server, 16).unwrap(), None);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut bytes = 10u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        let err = read_frame(&mut Cursor::new(bytes), MAX_FRAME_LEN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);

        // A huge but allowed header with no payload behind it fails the same way.
        let bytes = (1u64 << 39).to_le_bytes().to_vec();
        let err = read_frame(&mut Cursor::new(bytes), MAX_FRAME_LEN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"junk");
        let err = read_frame(&mut Cursor::new(bytes), MAX_FRAME_LEN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let mut bytes = 5u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"hello");
        let err = read_frame(&mut Cursor::new(bytes.clone()), 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(
            read_frame(&mut Cursor::new(bytes), 5).unwrap(),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn oversized_registration_fails_bootstrap() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();
        let config = Config::new(0, 2, addr.clone()).with_connect_timeout(Duration::from_secs(5));
        let root = thread::spawn(move || bootstrap(&config).map(|_| ()));

        let stream = connect_until(&addr, Instant::now() + Duration::from_secs(5)).unwrap();
        (&stream).write_all(&u64::MAX.to_le_bytes()).unwrap();

        let result = root.join().unwrap();
        assert!(matches!(result, Err(Error::Protocol(_))), "{result:?}");
    }

    #[test]
    fn address_table() {
        let table = vec![
            "0.0.0.0:29500".to_string(),
            "10.1.2.3:40001".to_string(),
            "[::1]:5".to_string(),
        ];
        assert_eq!(decode_table(&encode_table(&table)).unwrap(), table);
        assert!(decode_table(&[1, 0]).is_err());

        let mut trailing = encode_table(&table);
        trailing.push(0);
        assert!(matches!(decode_table(&trailing), Err(Error::Protocol(_))));
    }

    #[test]
    fn hello_layout() {
        let frame = encode_hello(7, 40000);
        assert_eq!(frame.len(), 6);
        assert_eq!(decode_hello(&frame).unwrap(), (7, 40000));
        assert!(decode_hello(&frame[..5]).is_err());
        assert_eq!(decode_rank(&3u32.to_le_bytes()).unwrap(), 3);
    }

    #[test]
    fn place_checks_rank_and_duplicates() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let conn = || TcpStream::connect(addr).unwrap();

        let mut slots: Vec<Option<TcpStream>> = (0..3).map(|_| None).collect();
        place(&mut slots, 2, conn()).unwrap();
        assert!(slots[2].is_some());
        assert!(matches!(
            place(&mut slots, 3, conn()),
            Err(Error::InvalidRank { rank: 3, size: 3 })
        ));
        assert!(matches!(
            place(&mut slots, -1, conn()),
            Err(Error::InvalidRank { rank: -1, size: 3 })
        ));
        assert!(matches!(place(&mut slots, 2, conn()), Err(Error::Protocol(_))));
    }

    #[test]
    fn connect_gives_up_at_deadline() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let deadline = Instant::now() + Duration::from_millis(100);
        let err = connect_until(&format!("127.0.0.1:{port}"), deadline).unwrap_err();
        assert!(matches!(err, Error::Launch(_)));
    }
}
