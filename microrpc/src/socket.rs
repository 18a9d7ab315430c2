use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{Error, ErrorKind, Result},
    msg::{LENGTH_PREFIX_LEN, frame_len, split_length_prefix},
};

/// A byte stream that frames can be written to and read from.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Connection for T {}

/// Reads one complete frame.
///
/// The first 8 bytes carry `header_length` and `body_length`, which together
/// give the size of the whole frame. Returns `Ok(None)` if the peer closed the
/// stream cleanly before a new frame started.
///
/// # Errors
///
/// Returns `TcpRecvMsgFailed` on I/O errors or EOF inside a frame, and
/// `TcpParseMsgFailed` if the declared lengths are invalid.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_LEN {
        let n = reader
            .read(&mut prefix[filled..])
            .await
            .map_err(|e| Error::new(ErrorKind::TcpRecvMsgFailed, e.to_string()))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::new(
                ErrorKind::TcpRecvMsgFailed,
                format!("socket eof after {filled} bytes of frame"),
            ));
        }
        filled += n;
    }

    let (header_length, body_length) = split_length_prefix(prefix);
    let total = frame_len(header_length, body_length)?;

    let mut frame = BytesMut::zeroed(total);
    frame[..LENGTH_PREFIX_LEN].copy_from_slice(&prefix);
    reader
        .read_exact(&mut frame[LENGTH_PREFIX_LEN..])
        .await
        .map_err(|e| Error::new(ErrorKind::TcpRecvMsgFailed, e.to_string()))?;

    Ok(Some(frame.freeze()))
}

/// Writes one encoded frame and flushes the stream.
///
/// # Errors
///
/// Returns `TcpSendMsgFailed` on I/O errors.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer
        .write_all(frame)
        .await
        .map_err(|e| Error::new(ErrorKind::TcpSendMsgFailed, e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::new(ErrorKind::TcpSendMsgFailed, e.to_string()))
}
