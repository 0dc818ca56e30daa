//! Multicast receive multiplexer (spec §4.7).
//!
//! Owns one UDP socket per distinct `(bind_address, rtp_port)` in use
//! by any reader, reference-counts multicast group joins, and runs a
//! single reactor thread that drains readable sockets in bursts of up
//! to 10 datagrams and dispatches each synchronously to every
//! registered filter that accepts it.
//!
//! The reactor never holds a lock while calling into a sink: it takes a
//! snapshot of the registration table, drops the lock, then dispatches.
//! This keeps the "reader never calls back into the reactor on the hot
//! path" cyclic-reference rule (spec §9 Design Notes) trivially true —
//! sinks only ever receive calls, never a handle back to the
//! multiplexer.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::Socket;

use crate::error::SocketError;
use crate::platform;
use crate::stream::{Filter, Session};

/// A socket is identified by the local interface it is bound to and
/// the RTP port; two sessions sharing this pair share a socket.
pub type SocketKey = (Ipv4Addr, u16);

/// Narrow interface the reactor dispatches datagrams through. A sink
/// never gets a handle back to the multiplexer: dispatch is one-way.
pub trait DatagramSink: Send + Sync {
    fn accept(&self, src: Ipv4Addr, dst: Ipv4Addr, t_ns: u64, data: &[u8]);
}

struct Registration {
    reader_id: u64,
    filter: Filter,
    sink: Arc<dyn DatagramSink>,
}

struct SocketEntry {
    socket: Arc<Socket>,
    registrations: Vec<Registration>,
    /// Refcount per `(group, interface)` — independent of which reader
    /// asked for it, per spec §4.7: `join;join;leave` keeps the group
    /// joined; the matching `leave` issues the kernel leave exactly
    /// once.
    memberships: HashMap<(Ipv4Addr, Ipv4Addr), usize>,
}

const BURST_SIZE: usize = 10;
const MAX_DATAGRAM: usize = 65536;
const POLL_IDLE_SLEEP: Duration = Duration::from_micros(200);

/// Owns socket lifecycle, group membership, and the reactor thread.
pub struct Multiplexer {
    sockets: Mutex<HashMap<SocketKey, SocketEntry>>,
    shutdown: AtomicBool,
}

impl Multiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sockets: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    fn ensure_socket(&self, key: SocketKey) -> std::io::Result<()> {
        let mut sockets = self.sockets.lock();
        if sockets.contains_key(&key) {
            return Ok(());
        }
        let addr = std::net::SocketAddr::new(key.0.into(), key.1);
        let socket = platform::open_udp(addr)?;
        sockets.insert(
            key,
            SocketEntry {
                socket: Arc::new(socket),
                registrations: Vec::new(),
                memberships: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Registers `sink` against `session` on `interface`, opening the
    /// socket and joining the multicast group if needed. Idempotent
    /// membership joins are reference-counted.
    pub fn register(
        &self,
        reader_id: u64,
        interface: Ipv4Addr,
        session: Session,
        filter: Filter,
        sink: Arc<dyn DatagramSink>,
    ) -> std::io::Result<()> {
        let key = (interface, session.rtp_port);
        self.ensure_socket(key)?;

        let mut sockets = self.sockets.lock();
        let entry = sockets.get_mut(&key).expect("just ensured");

        if session.is_multicast() {
            let membership_key = (session.address, interface);
            let refcount = entry.memberships.entry(membership_key).or_insert(0);
            if *refcount == 0 {
                platform::join_multicast_group(&entry.socket, session.address, interface)?;
            }
            *refcount += 1;
        }

        entry.registrations.push(Registration { reader_id, filter, sink });
        Ok(())
    }

    /// Reverses one `register` call. Leaves the multicast group only
    /// when its refcount drops to zero, and closes the socket only when
    /// no registrations remain on it.
    pub fn unregister(&self, reader_id: u64, interface: Ipv4Addr, session: Session) -> std::io::Result<()> {
        let key = (interface, session.rtp_port);
        let mut sockets = self.sockets.lock();
        let Some(entry) = sockets.get_mut(&key) else { return Ok(()) };

        entry
            .registrations
            .retain(|r| !(r.reader_id == reader_id && r.filter.dst == session.address));

        if session.is_multicast() {
            let membership_key = (session.address, interface);
            if let Some(refcount) = entry.memberships.get_mut(&membership_key) {
                *refcount -= 1;
                if *refcount == 0 {
                    platform::leave_multicast_group(&entry.socket, session.address, interface)?;
                    entry.memberships.remove(&membership_key);
                }
            }
        }

        if entry.registrations.is_empty() && entry.memberships.is_empty() {
            sockets.remove(&key);
        }
        Ok(())
    }

    pub fn membership_refcount(&self, interface: Ipv4Addr, session: Session) -> usize {
        let key = (interface, session.rtp_port);
        let sockets = self.sockets.lock();
        sockets
            .get(&key)
            .and_then(|e| e.memberships.get(&(session.address, interface)))
            .copied()
            .unwrap_or(0)
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Runs the reactor loop on a dedicated thread until `stop` is
    /// called. Each wake drains every open socket up to `BURST_SIZE`
    /// datagrams, dispatching synchronously to matching registrations.
    pub fn spawn_reactor(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        std::thread::Builder::new()
            .name("ravennakit-reactor".into())
            .spawn(move || this.reactor_loop())
            .expect("spawn reactor thread")
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn reactor_loop(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !self.shutdown.load(Ordering::Acquire) {
            let mut any_progress = false;

            let socket_snapshot: Vec<Arc<Socket>> = {
                let sockets = self.sockets.lock();
                sockets.values().map(|e| Arc::clone(&e.socket)).collect()
            };

            for socket in socket_snapshot {
                for _ in 0..BURST_SIZE {
                    match platform::recv_with_dst(&socket, &mut buf) {
                        Ok(Some(result)) => {
                            any_progress = true;
                            self.dispatch(&socket, result, &buf);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let kind = SocketError::from_io(&e);
                            if !kind.is_silent() {
                                log::error!("ravennakit: socket error, closing: {e}");
                            }
                            break;
                        }
                    }
                }
            }

            if !any_progress {
                std::thread::sleep(POLL_IDLE_SLEEP);
            }
        }
    }

    fn dispatch(&self, socket: &Arc<Socket>, result: platform::RecvResult, buf: &[u8]) {
        let Some(std::net::IpAddr::V4(dst)) = result.dst else { return };
        let std::net::SocketAddr::V4(src_v4) = result.src else { return };
        let src = *src_v4.ip();
        let data = &buf[..result.len];

        let sockets = self.sockets.lock();
        let Some(entry) = sockets.values().find(|e| Arc::ptr_eq(&e.socket, socket)) else {
            return;
        };
        // Snapshot the Arc sinks while holding the lock, then drop it
        // before calling out — dispatch must never hold a lock across a
        // user callback.
        let matching: Vec<Arc<dyn DatagramSink>> = entry
            .registrations
            .iter()
            .filter(|r| r.filter.matches(src, dst))
            .map(|r| Arc::clone(&r.sink))
            .collect();
        drop(sockets);

        for sink in matching {
            sink.accept(src, dst, result.t_ns, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink(Arc<AtomicUsize>);
    impl DatagramSink for CountingSink {
        fn accept(&self, _src: Ipv4Addr, _dst: Ipv4Addr, _t_ns: u64, _data: &[u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn loopback_session(port: u16) -> Session {
        Session::new(Ipv4Addr::new(127, 0, 0, 1), port, port + 1)
    }

    #[test]
    fn register_and_unregister_close_socket_when_empty() {
        let mux = Multiplexer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(CountingSink(counter));
        let session = loopback_session(16000);
        let filter = Filter::new(session.address);

        mux.register(1, Ipv4Addr::UNSPECIFIED, session, filter, sink).unwrap();
        assert_eq!(mux.socket_count(), 1);

        mux.unregister(1, Ipv4Addr::UNSPECIFIED, session).unwrap();
        assert_eq!(mux.socket_count(), 0);
    }

    #[test]
    fn multicast_refcount_join_join_leave_leave() {
        let mux = Multiplexer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let session = Session::new(Ipv4Addr::new(239, 5, 5, 5), 16002, 16003);
        let filter = Filter::new(session.address);
        let iface = Ipv4Addr::new(127, 0, 0, 1);

        mux.register(1, iface, session, filter, Arc::new(CountingSink(counter.clone()))).unwrap();
        assert_eq!(mux.membership_refcount(iface, session), 1);

        mux.register(2, iface, session, filter, Arc::new(CountingSink(counter.clone()))).unwrap();
        assert_eq!(mux.membership_refcount(iface, session), 2);

        mux.unregister(1, iface, session).unwrap();
        assert_eq!(mux.membership_refcount(iface, session), 1, "still joined after first leave");

        mux.unregister(2, iface, session).unwrap();
        assert_eq!(mux.membership_refcount(iface, session), 0);
        assert_eq!(mux.socket_count(), 0);
    }

    #[test]
    fn reactor_dispatches_unicast_datagram_to_matching_sink() {
        let mux = Multiplexer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let session = loopback_session(16010);
        let filter = Filter::new(session.address);
        mux.register(1, Ipv4Addr::UNSPECIFIED, session, filter, Arc::new(CountingSink(counter.clone()))).unwrap();

        let handle = mux.spawn_reactor();

        let send_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        send_socket.send_to(b"payload", ("127.0.0.1", session.rtp_port)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        mux.stop();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
