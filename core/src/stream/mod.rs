// Server-push event streaming over HTTP with bounded retry

pub mod frame;
pub mod reader;

pub use frame::{parse_frame, FrameDecoder, DATA_MARKER};
pub use reader::{
    ByteStream, EventSource, HttpEventSource, StreamingEventReader, STREAM_MAX_ATTEMPTS,
    STREAM_RETRY_DELAY,
};
