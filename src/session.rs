//! Session core: owns the duplex connection, demultiplexes inbound
//! frames onto the two virtual streams, serialises outbound writes and
//! coordinates shutdown.
//!
//! A session hosts four concurrent activities: the read loop (driven by
//! [`Session::serve`]), the server codec loop, the client response
//! dispatcher (both spawned at construction) and any number of caller
//! tasks. They share exactly two resources: the connection, read by the
//! read loop alone and written under one mutex, and the buffer pool.

use crate::client::{Call, CallHandle, Client};
use crate::codec::{Decodable, Encodable};
use crate::error::Error;
use crate::frame::{self, HEADER_SIZE, StreamId};
use crate::pool::BufferPool;
use crate::registry::{RegistrationError, Registry, Service};
use crate::server;
use crate::shutdown::{self, Shutdown, ShutdownSignal};
use crate::stream::stream_pair;
use bytes::BytesMut;
use std::sync::{Arc, Mutex};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Buffer-pool capacity used when a session is constructed with 0.
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Inbound queue depth per virtual stream. One frame is enough: a slow
/// codec then blocks the read loop, which is the back-pressure contract.
const INBOUND_QUEUE_DEPTH: usize = 1;

/// Which end of the connection this session is.
///
/// The roles are symmetric; the only difference is which virtual stream
/// carries the local client's bytes. Peers must be configured with
/// opposite roles, or neither side's calls reach the other's services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Yin,
    Yang,
}

impl Role {
    /// Stream carrying calls issued by this side.
    fn client_stream(self) -> StreamId {
        match self {
            Role::Yin => StreamId::Yin,
            Role::Yang => StreamId::Yang,
        }
    }
}

trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

type ConnReader = ReadHalf<Box<dyn Conn>>;
type ConnWriter = BufWriter<WriteHalf<Box<dyn Conn>>>;

/// Connection state shared between the session and its spawned tasks:
/// the serialised writer, the closed flag and the closed-signal.
pub(crate) struct Shared {
    writer: tokio::sync::Mutex<ConnWriter>,
    closed: Mutex<bool>,
    signal: ShutdownSignal,
    shutdown: Shutdown,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.signal.is_signalled()
    }

    fn shutdown_watcher(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Write one complete frame with the write mutex held.
    ///
    /// This serialisation is what keeps a Yin frame from interleaving
    /// with a Yang frame on the wire. The write races the closed-signal
    /// so `close` never deadlocks behind a stalled peer; an I/O failure
    /// closes the session before surfacing.
    pub(crate) async fn write_frame(&self, bytes: &[u8]) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let mut shutdown = self.shutdown_watcher();
        let mut writer = tokio::select! {
            _ = shutdown.closed() => return Err(Error::Closed),
            writer = self.writer.lock() => writer,
        };
        let written = tokio::select! {
            _ = shutdown.closed() => return Err(Error::Closed),
            written = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => written,
        };
        if let Err(e) = written {
            self.signal.signal();
            let _ = writer.shutdown().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Idempotent teardown: fire the closed-signal, then shut the write
    /// half down so the peer observes end-of-stream.
    pub(crate) async fn close(&self) -> Result<(), Error> {
        {
            let mut closed = self.closed.lock().unwrap();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        debug!("session closing");
        self.signal.signal();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }
}

/// One end of a bidirectional RPC connection over a single duplex byte
/// stream.
///
/// Construction wires both virtual streams and spawns the server and
/// dispatcher tasks, so it must run inside a tokio runtime. Nothing is
/// read from the connection until [`Session::serve`] runs.
pub struct Session {
    shared: Arc<Shared>,
    pool: Arc<BufferPool>,
    client: Client,
    registry: Arc<Registry>,
    role: Role,
    reader: Mutex<Option<ConnReader>>,
    yin_queue: mpsc::Sender<BytesMut>,
    yang_queue: mpsc::Sender<BytesMut>,
}

impl Session {
    /// Build a session over `conn` with an empty embedded registry.
    ///
    /// `pool_capacity == 0` selects [`DEFAULT_POOL_CAPACITY`].
    pub fn new(
        conn: impl AsyncRead + AsyncWrite + Send + Unpin + 'static,
        role: Role,
        pool_capacity: usize,
    ) -> Session {
        Session::with_registry(conn, role, pool_capacity, Arc::new(Registry::new()))
    }

    /// Build a session that dispatches into a caller-provided registry,
    /// which may be shared across sessions.
    pub fn with_registry(
        conn: impl AsyncRead + AsyncWrite + Send + Unpin + 'static,
        role: Role,
        pool_capacity: usize,
        registry: Arc<Registry>,
    ) -> Session {
        let capacity = if pool_capacity == 0 {
            DEFAULT_POOL_CAPACITY
        } else {
            pool_capacity
        };
        let (read_half, write_half) = tokio::io::split(Box::new(conn) as Box<dyn Conn>);
        let (signal, shutdown) = shutdown::channel();
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(BufWriter::new(write_half)),
            closed: Mutex::new(false),
            signal,
            shutdown: shutdown.clone(),
        });
        let pool = Arc::new(BufferPool::new(capacity));

        let (yin_queue, yin_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (yang_queue, yang_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let yin = stream_pair(
            StreamId::Yin,
            shared.clone(),
            yin_rx,
            pool.clone(),
            shutdown.clone(),
        );
        let yang = stream_pair(
            StreamId::Yang,
            shared.clone(),
            yang_rx,
            pool.clone(),
            shutdown,
        );

        // The role rule: the local client owns its role's stream, the
        // local server owns the other one.
        let (client_pair, server_pair) = match role.client_stream() {
            StreamId::Yin => (yin, yang),
            StreamId::Yang => (yang, yin),
        };

        let (client_reader, client_writer) = client_pair;
        let (server_reader, server_writer) = server_pair;

        let client = Client::new(client_writer);
        client.spawn_dispatcher(client_reader, shared.clone());
        tokio::spawn(server::serve_requests(
            server_reader,
            server_writer,
            registry.clone(),
        ));

        Session {
            shared,
            pool,
            client,
            registry,
            role,
            reader: Mutex::new(Some(read_half)),
            yin_queue,
            yang_queue,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Publish a service in the local registry under its own name.
    pub fn register<S: Service>(&self, service: S) -> Result<(), RegistrationError> {
        self.registry.register(service)
    }

    /// Publish a service in the local registry under `name`.
    pub fn register_name<S: Service>(
        &self,
        name: &str,
        service: S,
    ) -> Result<(), RegistrationError> {
        self.registry.register_name(name, service)
    }

    /// Invoke `method` on the peer and wait for its reply.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, Error>
    where
        A: Encodable,
        R: Decodable,
    {
        self.client.call(method, args).await
    }

    /// Schedule a call without waiting for the reply.
    ///
    /// The completed [`Call`] is posted to `done` when supplied (the
    /// channel must be buffered; delivery into a full channel is dropped
    /// as a caller bug), otherwise it is delivered through the returned
    /// handle's [`CallHandle::join`].
    pub async fn call_async<A, R>(
        &self,
        method: &str,
        args: &A,
        done: Option<mpsc::Sender<Call<R>>>,
    ) -> CallHandle<R>
    where
        A: Encodable,
        R: Decodable + Send + 'static,
    {
        self.client.call_async(method, args, done).await
    }

    /// Run the read loop: the sole reader of the underlying connection.
    ///
    /// Blocks until the connection drains or fails. A peer that simply
    /// goes away (end-of-stream, reset, broken pipe) is a clean shutdown
    /// and returns `Ok`; protocol violations and other I/O failures
    /// propagate. The session is closed on any exit.
    pub async fn serve(&self) -> Result<(), Error> {
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }
        let mut conn = self
            .reader
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::AlreadyServing)?;

        let result = self.read_loop(&mut conn).await;
        self.close().await?;
        match result {
            Err(e) if !e.is_benign_eof() => Err(e),
            _ => Ok(()),
        }
    }

    async fn read_loop(&self, conn: &mut ConnReader) -> Result<(), Error> {
        let mut shutdown = self.shared.shutdown_watcher();
        let mut header = [0u8; HEADER_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.closed() => return Ok(()),
                read = conn.read_exact(&mut header) => { read?; }
            }

            let (raw_id, body_len) = frame::decode_header(&header);
            let id = match StreamId::try_from(raw_id) {
                Ok(id) if body_len > 0 => id,
                _ => {
                    warn!(stream_id = raw_id, body_len, "invalid frame header");
                    return Err(Error::InvalidHeader {
                        stream_id: raw_id,
                        body_len,
                    });
                }
            };

            let mut body = self.pool.acquire();
            body.resize(body_len, 0);
            let read = tokio::select! {
                _ = shutdown.closed() => None,
                read = conn.read_exact(&mut body[..]) => Some(read),
            };
            match read {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.pool.release(body);
                    return Err(e.into());
                }
                None => {
                    self.pool.release(body);
                    return Ok(());
                }
            }
            trace!(stream = ?id, len = body_len, "frame received");

            let queue = match id {
                StreamId::Yin => &self.yin_queue,
                StreamId::Yang => &self.yang_queue,
            };
            // Reserving first keeps the buffer out of the race, so it
            // can go back to the pool if the closed-signal wins.
            let slot = tokio::select! {
                _ = shutdown.closed() => None,
                permit = queue.reserve() => permit.ok(),
            };
            match slot {
                Some(permit) => permit.send(body),
                // Closed, or the consumer task is gone; either way the
                // session is tearing down.
                None => {
                    self.pool.release(body);
                    return Ok(());
                }
            }
        }
    }

    /// Close the session. Idempotent.
    ///
    /// Fires the closed-signal (unsticking every pending read, write and
    /// call), shuts the connection down and fails outstanding calls with
    /// [`Error::Closed`].
    pub async fn close(&self) -> Result<(), Error> {
        self.shared.close().await?;
        self.client.fail_pending();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Wake the spawned tasks so they exit even if the session was
        // never explicitly closed.
        self.shared.signal.signal();
    }
}
