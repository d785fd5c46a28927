// i32 opcode, i32 length (little endian), JSON payload.

use anyhow::{anyhow, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const OPCODE_HANDSHAKE: i32 = 0;
pub const OPCODE_FRAME: i32 = 1;
pub const OPCODE_CLOSE: i32 = 2;
pub const OPCODE_PING: i32 = 3;
pub const OPCODE_PONG: i32 = 4;

const MAX_FRAME_LEN: usize = 1 << 20;

pub async fn write_frame<W>(writer: &mut W, opcode: i32, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(i32, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; 8];
    match reader.read_exact(&mut hdr).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let opcode = i32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let len = i32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
    if len < 0 || len as usize > MAX_FRAME_LEN {
        return Err(anyhow!("invalid ipc frame length {len}"));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some((opcode, payload)))
}

#[cfg(test)]
mod tests {
    use super::{read_frame, write_frame, OPCODE_FRAME, OPCODE_PING};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_survive_a_pipe() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, OPCODE_FRAME, br#"{"cmd":"X"}"#).await.unwrap();
        write_frame(&mut a, OPCODE_PING, b"").await.unwrap();

        let (op, payload) = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(op, OPCODE_FRAME);
        assert_eq!(payload, br#"{"cmd":"X"}"#);

        let (op, payload) = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(op, OPCODE_PING);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn clean_close_reads_as_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn negative_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut hdr = Vec::new();
        hdr.extend_from_slice(&1i32.to_le_bytes());
        hdr.extend_from_slice(&(-5i32).to_le_bytes());
        a.write_all(&hdr).await.unwrap();

        assert!(read_frame(&mut b).await.is_err());
    }
}
