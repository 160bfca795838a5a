pub mod apc;
pub mod archive;
pub mod mio;
pub mod progress;
pub mod solution;
pub mod time;

pub use apc::AdaptiveParameterControl;
pub use archive::Archive;
pub use mio::{Mio, ProgressCallback, SearchStatistics};
pub use progress::{ChannelProgressCallback, ConsoleProgressCallback, NoProgress, ProgressMessage};
pub use solution::Solution;
pub use time::{RateLimiter, SearchTimeController};
