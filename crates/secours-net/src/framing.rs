//! Length-prefixed record framing.
//!
//! Every application record on a TCP connection is `[u32 BE length][body]`.
//! Reads are all-or-nothing: a partial header or body fails the call and
//! the caller drops the connection. The length is validated against
//! [`MAX_FRAME_SIZE`] before the body is allocated, so a hostile header
//! cannot force a huge allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use secours_shared::constants::MAX_FRAME_SIZE;

use crate::error::NetError;

/// Write one frame: header, then body.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let header = (data.len() as u32).to_be_bytes();
    writer.write_all(&header).await?;
    writer.write_all(data).await?;
    Ok(())
}

/// Read one frame, rejecting bodies larger than [`MAX_FRAME_SIZE`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, b"hello mesh").await.unwrap();
        let payload = read_frame(&mut b).await.unwrap();
        assert_eq!(payload, b"hello mesh");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);

        write_frame(&mut a, b"").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_sequential_frames_preserved() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        write_frame(&mut a, b"first").await.unwrap();
        write_frame(&mut a, b"second").await.unwrap();

        assert_eq!(read_frame(&mut b).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut b).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_max_frame_accepted() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        let body = vec![0x42u8; MAX_FRAME_SIZE];

        let writer = tokio::spawn(async move {
            write_frame(&mut a, &body).await.unwrap();
        });

        let payload = read_frame(&mut b).await.unwrap();
        assert_eq!(payload.len(), MAX_FRAME_SIZE);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);

        // A raw header advertising MAX + 1 bytes; the body never arrives
        // because the reader must bail on the header alone.
        let len = (MAX_FRAME_SIZE as u32) + 1;
        tokio::io::AsyncWriteExt::write_all(&mut a, &len.to_be_bytes())
            .await
            .unwrap();

        match read_frame(&mut b).await {
            Err(NetError::FrameTooLarge(n)) => assert_eq!(n, MAX_FRAME_SIZE + 1),
            other => panic!("expected FrameTooLarge, got {:?}", other.map(|v| v.len())),
        }
    }

    #[tokio::test]
    async fn test_hostile_100mib_header_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let len: u32 = 100 * 1024 * 1024;
        tokio::io::AsyncWriteExt::write_all(&mut a, &len.to_be_bytes())
            .await
            .unwrap();

        assert!(matches!(
            read_frame(&mut b).await,
            Err(NetError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_errors() {
        let (mut a, mut b) = tokio::io::duplex(64);

        tokio::io::AsyncWriteExt::write_all(&mut a, &10u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, b"shor").await.unwrap();
        drop(a);

        assert!(matches!(read_frame(&mut b).await, Err(NetError::Io(_))));
    }
}
