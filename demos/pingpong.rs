//! Two sessions over a TCP loopback calling each other.
//!
//! Run with `cargo run --example pingpong`. Both endpoints register the
//! same greeter service and take turns invoking it on the peer.

use argh::FromArgs;
use birpc::codec::{self, CodecError, Decodable, Encodable};
use birpc::{Role, Service, ServiceError, Session};
use bytes::{Bytes, BytesMut};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

#[derive(FromArgs)]
/// Bidirectional RPC ping-pong over a TCP loopback.
struct Options {
    /// loopback address to use
    #[argh(option, default = "String::from(\"127.0.0.1:4860\")")]
    addr: String,

    /// number of calls made from each side
    #[argh(option, default = "4")]
    rounds: u32,
}

struct HiArgs {
    name: String,
}

impl Encodable for HiArgs {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        codec::put_string(buf, &self.name)
    }
}

impl Decodable for HiArgs {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(HiArgs {
            name: codec::get_string(buf)?,
        })
    }
}

struct HiReply {
    msg: String,
}

impl Encodable for HiReply {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        codec::put_string(buf, &self.msg)
    }
}

impl Decodable for HiReply {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(HiReply {
            msg: codec::get_string(buf)?,
        })
    }
}

struct Greeter {
    side: &'static str,
    count: AtomicU64,
}

impl Greeter {
    fn new(side: &'static str) -> Greeter {
        Greeter {
            side,
            count: AtomicU64::new(0),
        }
    }
}

impl Service for Greeter {
    fn name(&self) -> &str {
        "Greeter"
    }

    fn methods(&self) -> &[&str] {
        &["SayHi"]
    }

    fn call(&self, method: &str, args: &[u8]) -> Result<Bytes, ServiceError> {
        match method {
            "SayHi" => {
                let args = HiArgs::from_bytes(args)?;
                let count = self.count.fetch_add(1, Ordering::SeqCst);
                let reply = HiReply {
                    msg: format!("[{count}] Hi {}, from {}", args.name, self.side),
                };
                Ok(reply.to_bytes()?)
            }
            other => Err(ServiceError::NoSuchMethod {
                service: "Greeter".into(),
                method: other.into(),
            }),
        }
    }
}

#[tokio::main]
async fn main() -> birpc::Result<()> {
    tracing_subscriber::fmt::init();
    let options: Options = argh::from_env();

    let listener = TcpListener::bind(&options.addr).await?;
    let client_conn = TcpStream::connect(&options.addr).await?;
    let (server_conn, _) = listener.accept().await?;

    let yin = Arc::new(Session::new(client_conn, Role::Yin, 0));
    let yang = Arc::new(Session::new(server_conn, Role::Yang, 0));
    yin.register(Greeter::new("Yin"))?;
    yang.register(Greeter::new("Yang"))?;

    let serve_yin = yin.clone();
    tokio::spawn(async move { serve_yin.serve().await });
    let serve_yang = yang.clone();
    tokio::spawn(async move { serve_yang.serve().await });

    for round in 0..options.rounds {
        let reply: HiReply = yin
            .call(
                "Greeter.SayHi",
                &HiArgs {
                    name: format!("ping-{round}"),
                },
            )
            .await?;
        info!(reply = %reply.msg, "yin -> yang");

        let reply: HiReply = yang
            .call(
                "Greeter.SayHi",
                &HiArgs {
                    name: format!("pong-{round}"),
                },
            )
            .await?;
        info!(reply = %reply.msg, "yang -> yin");
    }

    yin.close().await?;
    yang.close().await?;
    Ok(())
}
