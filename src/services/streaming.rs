//! Bounded-buffer byte pumps used for both ingestion and serving.

use std::io::SeekFrom;
use tokio::{
    fs::File,
    io::{self, AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, Take},
};
use tokio_util::io::ReaderStream;

use super::range::ByteRange;

/// Buffer size for every copy; memory per stream never exceeds this.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Copy `reader` into `writer` through one fixed buffer of `chunk_size`
/// bytes, handing every chunk to `inspect` before it is written.
///
/// Returns the number of bytes copied.
pub async fn copy_in_chunks<R, W, F>(
    mut reader: R,
    writer: &mut W,
    chunk_size: usize,
    mut inspect: F,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        inspect(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    Ok(total)
}

/// Position `file` at the start of `range` and return a stream yielding
/// exactly `range.len()` bytes in chunks of at most [`CHUNK_SIZE`].
pub async fn range_stream(mut file: File, range: ByteRange) -> io::Result<ReaderStream<Take<File>>> {
    file.seek(SeekFrom::Start(range.start)).await?;
    Ok(ReaderStream::with_capacity(file.take(range.len()), CHUNK_SIZE))
}

/// Stream the whole of `file` in chunks of at most [`CHUNK_SIZE`].
pub fn full_stream(file: File) -> ReaderStream<File> {
    ReaderStream::with_capacity(file, CHUNK_SIZE)
}
