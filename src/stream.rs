//! Turning readers into response bodies without buffering them.

use axum::body::Bytes;
use futures_lite::stream::{self, Stream};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read size for streamed bodies.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Stream `reader` in chunks of at most [`CHUNK_SIZE`] bytes.
///
/// Ends after EOF or after yielding the first read error.
pub fn reader_stream<R>(reader: R) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::StreamExt;

    #[tokio::test]
    async fn streams_in_chunks() {
        let data = vec![7u8; CHUNK_SIZE + 10];
        let chunks: Vec<_> = reader_stream(std::io::Cursor::new(data.clone()))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(chunks.len(), 2);
        let joined: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn empty_reader() {
        let count = reader_stream(&b""[..]).count().await;
        assert_eq!(count, 0);
    }
}
