//! The RPC message codec layered on the virtual streams.
//!
//! Two message shapes exist, one per direction of a logical channel. A
//! request is `seq | method | body`; a response is `seq | status |
//! [error] | body`. Strings are u16-length-prefixed UTF-8, integers are
//! big-endian, bodies are u32-length-prefixed opaque value encodings.
//! Every message ends with one stream flush, so one codec message always
//! travels as one frame. Both peers must run this codec, in opposite
//! roles.
//!
//! Argument and result values go through the [`Encodable`] and
//! [`Decodable`] traits; the transport never interprets them.

use crate::error::Error;
use crate::frame::MAX_BODY_LEN;
use crate::stream::{StreamReader, StreamWriter};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

/// Codec-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("incomplete value: need more data")]
    Incomplete,

    #[error("length field {len} exceeds the {max} byte limit")]
    LengthOverflow { len: usize, max: usize },

    #[error("invalid utf-8 in string field")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("unexpected response status {0:#04x}")]
    InvalidStatus(u8),

    #[error("message does not fit in one frame: {len} bytes")]
    Oversized { len: usize },
}

/// A value that can be written as call arguments or a call result.
pub trait Encodable {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// A value that can be read back out of a call body.
pub trait Decodable: Sized {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError>;

    /// Decode from a complete body.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::decode(&mut Cursor::new(bytes))
    }
}

/// Append a u16-length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    if s.len() > u16::MAX as usize {
        return Err(CodecError::LengthOverflow {
            len: s.len(),
            max: u16::MAX as usize,
        });
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Read a u16-length-prefixed UTF-8 string.
pub fn get_string(buf: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let len = get_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Incomplete);
    }
    let bytes = buf.copy_to_bytes(len);
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Append a u32-length-prefixed byte string.
pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.len() > u32::MAX as usize {
        return Err(CodecError::LengthOverflow {
            len: bytes.len(),
            max: u32::MAX as usize,
        });
    }
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
    Ok(())
}

/// Read a u32-length-prefixed byte string.
pub fn get_bytes(buf: &mut Cursor<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

pub fn get_u8(buf: &mut Cursor<&[u8]>) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut Cursor<&[u8]>) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u16())
}

pub fn get_u32(buf: &mut Cursor<&[u8]>) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u32())
}

pub fn get_u64(buf: &mut Cursor<&[u8]>) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u64())
}

impl Encodable for String {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_string(buf, self)
    }
}

impl Decodable for String {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        get_string(buf)
    }
}

impl Encodable for u64 {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u64(*self);
        Ok(())
    }
}

impl Decodable for u64 {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        get_u64(buf)
    }
}

impl Encodable for Vec<u8> {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_bytes(buf, self)
    }
}

impl Decodable for Vec<u8> {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        get_bytes(buf)
    }
}

impl Encodable for () {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for () {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(())
    }
}

/// Header of one request message.
#[derive(Debug)]
pub(crate) struct RequestHeader {
    pub seq: u64,
    pub method: String,
}

/// Write one complete request and flush it as a single frame.
pub(crate) async fn write_request(
    stream: &mut StreamWriter,
    seq: u64,
    method: &str,
    body: &[u8],
) -> Result<(), Error> {
    let mut msg = BytesMut::with_capacity(8 + 2 + method.len() + 4 + body.len());
    msg.put_u64(seq);
    put_string(&mut msg, method)?;
    put_body(&mut msg, body)?;
    stream.write(&msg);
    stream.flush().await
}

/// Read one complete request: header plus the encoded argument body.
pub(crate) async fn read_request(
    stream: &mut StreamReader,
) -> Result<(RequestHeader, BytesMut), Error> {
    let seq = read_u64(stream).await?;
    let method = read_string(stream).await?;
    let body = read_body(stream).await?;
    Ok((RequestHeader { seq, method }, body))
}

/// Write one complete response and flush it as a single frame. A handler
/// failure travels as a status byte plus the error text and an empty
/// body.
pub(crate) async fn write_response(
    stream: &mut StreamWriter,
    seq: u64,
    reply: Result<&[u8], &str>,
) -> Result<(), Error> {
    let mut msg = BytesMut::new();
    msg.put_u64(seq);
    match reply {
        Ok(body) => {
            msg.put_u8(STATUS_OK);
            put_body(&mut msg, body)?;
        }
        Err(text) => {
            msg.put_u8(STATUS_ERROR);
            put_string(&mut msg, text)?;
            put_body(&mut msg, &[])?;
        }
    }
    stream.write(&msg);
    stream.flush().await
}

/// Read one complete response, returning the sequence number and either
/// the encoded result body or the remote error text.
pub(crate) async fn read_response(
    stream: &mut StreamReader,
) -> Result<(u64, Result<BytesMut, String>), Error> {
    let seq = read_u64(stream).await?;
    let status = read_u8(stream).await?;
    match status {
        STATUS_OK => {
            let body = read_body(stream).await?;
            Ok((seq, Ok(body)))
        }
        STATUS_ERROR => {
            let text = read_string(stream).await?;
            let _empty = read_body(stream).await?;
            Ok((seq, Err(text)))
        }
        other => Err(Error::Codec(CodecError::InvalidStatus(other))),
    }
}

fn put_body(buf: &mut BytesMut, body: &[u8]) -> Result<(), CodecError> {
    if body.len() > MAX_BODY_LEN {
        return Err(CodecError::Oversized { len: body.len() });
    }
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(())
}

async fn read_u8(stream: &mut StreamReader) -> Result<u8, Error> {
    let mut buf = [0u8; 1];
    stream.read_exact(&mut buf).await?;
    Ok(buf[0])
}

async fn read_u16(stream: &mut StreamReader) -> Result<u16, Error> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

async fn read_u64(stream: &mut StreamReader) -> Result<u64, Error> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).await?;
    Ok(u64::from_be_bytes(buf))
}

async fn read_string(stream: &mut StreamReader) -> Result<String, Error> {
    let len = read_u16(stream).await? as usize;
    let mut bytes = vec![0u8; len];
    stream.read_exact(&mut bytes).await?;
    Ok(String::from_utf8(bytes).map_err(CodecError::from)?)
}

async fn read_body(stream: &mut StreamReader) -> Result<BytesMut, Error> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    let len = u32::from_be_bytes(buf) as usize;
    if len > MAX_BODY_LEN {
        return Err(Error::Codec(CodecError::LengthOverflow {
            len,
            max: MAX_BODY_LEN,
        }));
    }
    let mut body = BytesMut::zeroed(len);
    stream.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "Service.SayHi").unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(get_string(&mut cursor).unwrap(), "Service.SayHi");
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn string_too_long_is_rejected() {
        let mut buf = BytesMut::new();
        let big = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            put_string(&mut buf, &big),
            Err(CodecError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn truncated_string_is_incomplete() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "truncate me").unwrap();
        let short = &buf[..buf.len() - 3];
        let mut cursor = Cursor::new(short);
        assert!(matches!(
            get_string(&mut cursor),
            Err(CodecError::Incomplete)
        ));
    }

    #[test]
    fn bytes_round_trip() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, b"\x00\x01\x02payload").unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(get_bytes(&mut cursor).unwrap(), b"\x00\x01\x02payload");
    }

    #[test]
    fn unit_value_encodes_to_nothing() {
        let bytes = ().to_bytes().unwrap();
        assert!(bytes.is_empty());
        <()>::from_bytes(&bytes).unwrap();
    }

    #[test]
    fn oversized_body_is_rejected() {
        let mut msg = BytesMut::new();
        let body = vec![0u8; MAX_BODY_LEN + 1];
        assert!(matches!(
            put_body(&mut msg, &body),
            Err(CodecError::Oversized { .. })
        ));
    }
}
