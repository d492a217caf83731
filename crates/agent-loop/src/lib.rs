pub mod config;
pub mod runner;
pub mod sink;
pub mod stream;

pub use config::AgentLoopConfig;
pub use runner::{prepare_request, run_agent_loop, LoopOutcome, StopReason};
pub use sink::{BufferSink, DisplaySink};
pub use stream::{spawn_demux, Demultiplexer, ToUserScanner};
