//! Line sources feeding the analysis pipeline.
//!
//! A source yields capture descriptor lines in arrival order and signals the
//! end of data with `Ok(None)`. Implementations must be cancel-safe: the
//! aggregator races `next_line` against its window deadline, so a dropped
//! `next_line` future must not lose a line.

mod channel;
mod reader;

use std::future::Future;

pub use channel::ChannelSource;
pub use reader::ReaderSource;

use thiserror::Error;

pub trait LineSource {
    fn next_line(&mut self) -> impl Future<Output = Result<Option<String>, SourceError>> + Send;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
