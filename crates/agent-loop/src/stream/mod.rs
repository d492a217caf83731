//! Turning one streamed model response into user text and tool calls.

pub mod demux;
pub mod handler;
pub mod to_user;

pub use demux::{DemuxSummary, Demultiplexer, ToolCallOutput, UserOutput, CALL_SEPARATOR};
pub use handler::{spawn_demux, DemuxChannels};
pub use to_user::{ScanEvent, ToUserScanner};
