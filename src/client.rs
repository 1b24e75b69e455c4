//! Client side of a session: issues requests on its virtual stream and
//! matches inbound responses to pending calls.
//!
//! Any number of caller tasks may issue calls concurrently; requests are
//! serialised on the stream writer, and a single dispatcher task owns the
//! stream reader and completes the pending-call table. Closing the
//! session fails every outstanding call with [`Error::Closed`].

use crate::codec::{self, Decodable, Encodable};
use crate::error::Error;
use crate::session::Shared;
use crate::stream::{StreamReader, StreamWriter};
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Outcome = Result<BytesMut, Error>;

/// One completed asynchronous call.
#[derive(Debug)]
pub struct Call<R> {
    /// The `"Service.Method"` name the call addressed.
    pub method: String,
    /// The decoded reply, or what went wrong.
    pub result: Result<R, Error>,
}

/// Handle for a call scheduled with `call_async`.
///
/// When the caller supplied a notifier channel, the completed [`Call`] is
/// posted there and the handle only identifies the call. Otherwise the
/// handle owns delivery and [`CallHandle::join`] waits for it.
#[derive(Debug)]
pub struct CallHandle<R> {
    method: String,
    done: Option<mpsc::Receiver<Call<R>>>,
}

impl<R> CallHandle<R> {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the call to complete.
    ///
    /// Returns `None` when a caller-supplied notifier owns delivery of
    /// the completed call.
    pub async fn join(self) -> Option<Call<R>> {
        let CallHandle { method, done } = self;
        let mut rx = done?;
        match rx.recv().await {
            Some(call) => Some(call),
            None => Some(Call {
                method,
                result: Err(Error::Closed),
            }),
        }
    }
}

struct PendingState {
    next_seq: u64,
    closed: bool,
    waiting: HashMap<u64, oneshot::Sender<Outcome>>,
}

/// Table of calls waiting for their responses.
struct Pending {
    state: Mutex<PendingState>,
}

impl Pending {
    fn new() -> Pending {
        Pending {
            state: Mutex::new(PendingState {
                next_seq: 0,
                closed: false,
                waiting: HashMap::new(),
            }),
        }
    }

    fn begin(&self) -> Result<(u64, oneshot::Receiver<Outcome>), Error> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::Closed);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let (tx, rx) = oneshot::channel();
        state.waiting.insert(seq, tx);
        Ok((seq, rx))
    }

    fn abandon(&self, seq: u64) {
        self.state.lock().unwrap().waiting.remove(&seq);
    }

    fn complete(&self, seq: u64, outcome: Outcome) -> bool {
        let tx = self.state.lock().unwrap().waiting.remove(&seq);
        match tx {
            Some(tx) => {
                // The caller may have given up; that is its business.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding call and refuse new ones.
    fn fail_all(&self) {
        let waiting = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            std::mem::take(&mut state.waiting)
        };
        for (_, tx) in waiting {
            let _ = tx.send(Err(Error::Closed));
        }
    }
}

pub(crate) struct Client {
    writer: tokio::sync::Mutex<StreamWriter>,
    pending: Arc<Pending>,
}

impl Client {
    pub(crate) fn new(writer: StreamWriter) -> Client {
        Client {
            writer: tokio::sync::Mutex::new(writer),
            pending: Arc::new(Pending::new()),
        }
    }

    /// Spawn the dispatcher that reads responses off the client-side
    /// virtual stream and completes pending calls. Exits when the stream
    /// reports closure; a malformed response is fatal to the session.
    pub(crate) fn spawn_dispatcher(&self, mut reader: StreamReader, shared: Arc<Shared>) {
        let pending = self.pending.clone();
        tokio::spawn(async move {
            loop {
                match codec::read_response(&mut reader).await {
                    Ok((seq, reply)) => {
                        let outcome = reply.map_err(Error::Remote);
                        if !pending.complete(seq, outcome) {
                            warn!(seq, "response for unknown call");
                        }
                    }
                    Err(Error::Closed) => break,
                    Err(e) => {
                        warn!(error = %e, "client codec failed");
                        let _ = shared.close().await;
                        break;
                    }
                }
            }
            pending.fail_all();
            debug!("client dispatcher exited");
        });
    }

    pub(crate) async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, Error>
    where
        A: Encodable,
        R: Decodable,
    {
        let rx = self.start(method, args).await?;
        await_reply(rx).await
    }

    pub(crate) async fn call_async<A, R>(
        &self,
        method: &str,
        args: &A,
        done: Option<mpsc::Sender<Call<R>>>,
    ) -> CallHandle<R>
    where
        A: Encodable,
        R: Decodable + Send + 'static,
    {
        let method = method.to_owned();
        let (notify, handle_rx) = match done {
            // The caller's channel must be buffered; a full channel drops
            // the notification rather than blocking completion.
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(1);
                (tx, Some(rx))
            }
        };

        let started = self.start(&method, args).await;
        let task_method = method.clone();
        tokio::spawn(async move {
            let result = match started {
                Ok(rx) => await_reply(rx).await,
                Err(e) => Err(e),
            };
            let call = Call {
                method: task_method,
                result,
            };
            if notify.try_send(call).is_err() {
                warn!("call notifier full or dropped; completion lost");
            }
        });

        CallHandle {
            method,
            done: handle_rx,
        }
    }

    /// Register the call and put its request on the wire.
    async fn start(
        &self,
        method: &str,
        args: &impl Encodable,
    ) -> Result<oneshot::Receiver<Outcome>, Error> {
        let body = args.to_bytes()?;
        let (seq, rx) = self.pending.begin()?;
        let mut writer = self.writer.lock().await;
        if let Err(e) = codec::write_request(&mut writer, seq, method, &body).await {
            drop(writer);
            self.pending.abandon(seq);
            return Err(e);
        }
        Ok(rx)
    }

    pub(crate) fn fail_pending(&self) {
        self.pending.fail_all();
    }
}

async fn await_reply<R: Decodable>(rx: oneshot::Receiver<Outcome>) -> Result<R, Error> {
    match rx.await {
        Ok(Ok(body)) => R::from_bytes(&body).map_err(Error::Codec),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Closed),
    }
}
