use crate::record::LogLine;
use std::cell::{Ref, RefCell};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

/// Destination of traced events.
///
/// Implementors must have the line persisted by the time `record` returns.
/// Reallocations and releases run only after their line is written.
pub trait LogSink {
    fn record(&mut self, line: &LogLine) -> io::Result<()>;
}

impl LogSink for Box<dyn LogSink> {
    fn record(&mut self, line: &LogLine) -> io::Result<()> {
        (**self).record(line)
    }
}

/// Writes each event as one human readable line.
#[derive(Debug)]
pub struct TextLines<W: Write> {
    writer: W,
}

impl<W: Write> TextLines<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> LogSink for TextLines<W> {
    fn record(&mut self, line: &LogLine) -> io::Result<()> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}

/// Writes each event as one JSON object per line.
#[derive(Debug)]
pub struct JsonLines<W: Write> {
    writer: W,
}

impl<W: Write> JsonLines<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> LogSink for JsonLines<W> {
    fn record(&mut self, line: &LogLine) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Vec<LogLine>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn take(&mut self) -> Vec<LogLine> {
        std::mem::take(&mut self.lines)
    }
}

impl LogSink for MemorySink {
    fn record(&mut self, line: &LogLine) -> io::Result<()> {
        self.lines.push(line.clone());
        Ok(())
    }
}

/// A sink that stays readable after being handed to a tracer.
#[derive(Debug, Default)]
pub struct SharedSink<S: LogSink> {
    inner: Rc<RefCell<S>>,
}

impl<S: LogSink> SharedSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            inner: Rc::new(RefCell::new(sink)),
        }
    }

    pub fn borrow(&self) -> Ref<'_, S> {
        self.inner.borrow()
    }
}

impl<S: LogSink> Clone for SharedSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: LogSink> LogSink for SharedSink<S> {
    fn record(&mut self, line: &LogLine) -> io::Result<()> {
        self.inner.borrow_mut().record(line)
    }
}

/// Where the trace goes: stdout, or a file that replaces any previous trace.
#[derive(Debug)]
pub enum Output {
    Stdout(io::Stdout),
    File(BufWriter<File>),
}

impl Output {
    pub fn stdout() -> Self {
        Output::Stdout(io::stdout())
    }

    /// Creates or truncates `path`.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Output::File(BufWriter::new(File::create(path)?)))
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Stdout(out) => out.write(buf),
            Output::File(out) => out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Stdout(out) => out.flush(),
            Output::File(out) => out.flush(),
        }
    }
}
