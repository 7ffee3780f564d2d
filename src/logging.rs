use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_CAPACITY: usize = 600;

/// Bounded in-memory sink for this process's own log records.
///
/// The UI log pane reads from here, so the layer writing into it is
/// configured without ANSI escapes. The buffer is owned by the panel and
/// never depends on global logging state another component may have set up.
#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn push_line(&self, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push_back(line.to_string());
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    /// Last `limit` captured lines, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<String> {
        let lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        match self.lines.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Per-event writer handed out to the fmt layer; complete lines land in the
/// buffer, a trailing partial line is flushed on drop.
pub struct LogBufferWriter {
    buffer: LogBuffer,
    pending: Vec<u8>,
}

impl LogBufferWriter {
    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\n', '\r']);
            if !text.is_empty() {
                self.buffer.push_line(text);
            }
        }
    }
}

impl Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.drain_complete_lines();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain_complete_lines();
        Ok(())
    }
}

impl Drop for LogBufferWriter {
    fn drop(&mut self) {
        self.drain_complete_lines();
        if !self.pending.is_empty() {
            let text = String::from_utf8_lossy(&self.pending).to_string();
            if !text.trim().is_empty() {
                self.buffer.push_line(text.trim_end());
            }
            self.pending.clear();
        }
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter {
            buffer: self.clone(),
            pending: Vec::new(),
        }
    }
}

pub fn init_tracing(component: &str, buffer: LogBuffer) {
    let default_filter = format!("info,firefly_panel=debug,{component}=debug");

    let filter = std::env::var("FIREFLY_LOG")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    let console_layer = tracing_subscriber::fmt::layer().with_target(true).compact();

    // ANSI stays off for this layer: its lines are embedded in HTML.
    let panel_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .compact()
        .with_writer(buffer);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(panel_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_bounded() {
        let buffer = LogBuffer::new(3);
        for i in 0..10 {
            buffer.push_line(&format!("line {i}"));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.tail(10), vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn tail_returns_most_recent_lines_in_order() {
        let buffer = LogBuffer::new(10);
        buffer.push_line("a");
        buffer.push_line("b");
        buffer.push_line("c");
        assert_eq!(buffer.tail(2), vec!["b", "c"]);
        assert_eq!(buffer.tail(100), vec!["a", "b", "c"]);
    }

    #[test]
    fn writer_splits_on_newlines() {
        let buffer = LogBuffer::new(10);
        let mut writer = buffer.make_writer();
        writer.write_all(b"first line\nsecond ").unwrap();
        writer.write_all(b"half\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(buffer.tail(10), vec!["first line", "second half"]);
    }

    #[test]
    fn writer_flushes_partial_line_on_drop() {
        let buffer = LogBuffer::new(10);
        {
            let mut writer = buffer.make_writer();
            writer.write_all(b"no trailing newline").unwrap();
        }
        assert_eq!(buffer.tail(10), vec!["no trailing newline"]);
    }
}
