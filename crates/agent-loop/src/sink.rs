/// Receives the user-visible text of a turn, chunk by chunk, in order.
///
/// `end` is called exactly once per model response, after its last chunk.
pub trait DisplaySink: Send {
    fn append(&mut self, chunk: &str);

    /// The `to_user` text of one tool call is complete.
    fn segment_end(&mut self) {}

    fn end(&mut self);
}

/// Sink that keeps everything in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    pub text: String,
    pub chunks: Vec<String>,
    pub segments: usize,
    pub ends: usize,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySink for BufferSink {
    fn append(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        self.chunks.push(chunk.to_string());
    }

    fn segment_end(&mut self) {
        self.segments += 1;
    }

    fn end(&mut self) {
        self.ends += 1;
    }
}
