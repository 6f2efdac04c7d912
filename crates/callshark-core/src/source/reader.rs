use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::{LineSource, SourceError};

/// Line source over any buffered async reader (stdin, a file, a capture
/// process's stdout).
///
/// Bytes that are not valid UTF-8 are replaced rather than failing the read.
pub struct ReaderSource<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R> LineSource for ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        // `read_until` appends to `buf`, so a cancelled call resumes where it
        // stopped on the next poll.
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::ReaderSource;
    use crate::source::LineSource;

    #[tokio::test]
    async fn yields_lines_then_end_of_data() {
        let data: &[u8] = b"first\r\nsecond\nlast";
        let mut source = ReaderSource::new(data);
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("last"));
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let data: &[u8] = b"ok \xff\n";
        let mut source = ReaderSource::new(data);
        let line = source.next_line().await.unwrap().unwrap();
        assert!(line.starts_with("ok "));
    }
}
