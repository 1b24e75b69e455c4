//! A symmetric, bidirectional RPC transport over a single duplex byte
//! stream.
//!
//! Both endpoints of a [`Session`] act as client and server at the same
//! time: a thin four-byte framing layer multiplexes two virtual byte
//! streams, named Yin and Yang, over one connection, and each direction
//! carries an independent request/response channel. The session in the
//! [`Role::Yin`] role issues its calls on the Yin stream and answers the
//! peer's calls from the Yang stream; the Yang role inverts this, so the
//! two peers must be configured in opposite roles.

pub mod client;
pub mod codec;
pub mod error;
pub mod frame;
pub mod pool;
pub mod registry;
pub mod session;

mod server;
mod shutdown;
mod stream;


pub use client::{Call, CallHandle};
pub use codec::{CodecError, Decodable, Encodable};
pub use error::Error;
pub use frame::{HEADER_SIZE, MAX_BODY_LEN, StreamId};
pub use pool::BufferPool;
pub use registry::{RegistrationError, Registry, Service, ServiceError};
pub use session::{DEFAULT_POOL_CAPACITY, Role, Session};

/// A specialized `Result` type for session operations.
///
/// # Examples
///
/// Two sessions over an in-memory pipe, calling each other:
///
/// ```rust,no_run
/// use birpc::{Role, Service, ServiceError, Session};
/// use bytes::Bytes;
/// use std::sync::Arc;
///
/// struct Echo;
///
/// impl Service for Echo {
///     fn name(&self) -> &str {
///         "Echo"
///     }
///
///     fn methods(&self) -> &[&str] {
///         &["Ping"]
///     }
///
///     fn call(&self, _method: &str, args: &[u8]) -> Result<Bytes, ServiceError> {
///         Ok(Bytes::copy_from_slice(args))
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> birpc::Result<()> {
///     let (a, b) = tokio::io::duplex(16 * 1024);
///     let yin = Arc::new(Session::new(a, Role::Yin, 0));
///     let yang = Arc::new(Session::new(b, Role::Yang, 0));
///
///     yang.register(Echo)?;
///
///     let serve_yin = yin.clone();
///     tokio::spawn(async move { serve_yin.serve().await });
///     let serve_yang = yang.clone();
///     tokio::spawn(async move { serve_yang.serve().await });
///
///     let pong: Vec<u8> = yin.call("Echo.Ping", &b"hello".to_vec()).await?;
///     assert_eq!(pong, b"hello");
///
///     yin.close().await?;
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
