use tokio::sync::mpsc;

use super::{LineSource, SourceError};

/// Line source fed through an in-process channel. The source ends once every
/// sender has been dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Create a sender/source pair with the given buffer size.
    pub fn channel(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

impl LineSource for ChannelSource {
    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelSource;
    use crate::source::LineSource;

    #[tokio::test]
    async fn ends_when_senders_drop() {
        let (tx, mut source) = ChannelSource::channel(4);
        tx.send("line".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("line"));
        assert_eq!(source.next_line().await.unwrap(), None);
    }
}
