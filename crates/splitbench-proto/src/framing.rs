//! Message framing for the storage/compute stream.
//!
//! Every message is a 4-byte big-endian length prefix followed by the
//! payload, so one logical message maps to exactly one frame regardless of
//! how the transport splits reads.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Error;

/// Default maximum message size (64 MB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a payload with a length prefix.
///
/// Returns a new buffer containing `[length (4 bytes BE)][payload]`.
pub fn encode_frame(payload: &[u8], max_size: usize) -> Result<Vec<u8>, Error> {
    if payload.len() > max_size {
        return Err(Error::InvalidMessage(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            max_size
        )));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| Error::InvalidMessage(format!("payload size {} overflows u32", payload.len())))?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode the length from a 4-byte header.
pub fn decode_frame_length(header: &[u8; LENGTH_PREFIX_SIZE], max_size: usize) -> Result<usize, Error> {
    let len = u32::from_be_bytes(*header) as usize;
    if len > max_size {
        return Err(Error::InvalidMessage(format!(
            "frame length {} exceeds maximum {}",
            len, max_size
        )));
    }
    Ok(len)
}

/// Write one framed message and flush the stream.
///
/// Returns the number of bytes written, prefix included.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_size: usize) -> Result<usize, Error>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload, max_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(frame.len())
}

/// Read one framed message and return its payload.
///
/// A peer that closes the stream mid-frame yields [`Error::UnexpectedEof`].
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    read_exact_or_eof(reader, &mut header).await?;
    let len = decode_frame_length(&header, max_size)?;

    let mut payload = BytesMut::zeroed(len);
    read_exact_or_eof(reader, &mut payload).await?;
    Ok(payload.to_vec())
}

async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::UnexpectedEof {
                received: filled,
                expected: buf.len(),
            });
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_small() {
        let payload = b"hello";
        let frame = encode_frame(payload, MAX_MESSAGE_SIZE).unwrap();

        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + payload.len());
        // Length should be 5 in big-endian
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], payload);
    }

    #[test]
    fn test_encode_frame_too_large() {
        let payload = vec![0u8; 17];
        assert!(encode_frame(&payload, 16).is_err());
    }

    #[test]
    fn test_decode_frame_length_too_large() {
        let header = 1025u32.to_be_bytes();
        assert!(decode_frame_length(&header, 1024).is_err());
        assert_eq!(decode_frame_length(&header, 2048).unwrap(), 1025);
    }

    #[tokio::test]
    async fn test_frame_over_split_reads() {
        let (mut client, mut server) = tokio::io::duplex(3);

        let writer = tokio::spawn(async move {
            write_frame(&mut client, b"SELECT column06 FROM lineitem", MAX_MESSAGE_SIZE)
                .await
                .unwrap()
        });

        let payload = read_frame(&mut server, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(payload, b"SELECT column06 FROM lineitem");
        assert_eq!(writer.await.unwrap(), LENGTH_PREFIX_SIZE + payload.len());
    }

    #[tokio::test]
    async fn test_read_frame_truncated() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 10, 1, 2, 3]).await.unwrap();
        drop(client);

        let result = read_frame(&mut server, MAX_MESSAGE_SIZE).await;
        assert!(matches!(
            result,
            Err(Error::UnexpectedEof {
                received: 3,
                expected: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_header() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&64u32.to_be_bytes()).await.unwrap();

        let result = read_frame(&mut server, 32).await;
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }
}
