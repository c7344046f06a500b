//! Download backends
//!
//! Implementations of the `DownloadAdapter` seam used by the queue.

pub mod comments;
pub mod ytdlp;

pub use ytdlp::YtDlpAdapter;
