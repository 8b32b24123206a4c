use crate::config::TraceConfig;
use crate::error::{Result, TraceError};

/// One active traced function.
#[derive(Debug)]
struct Frame {
    id: &'static str,
    next: Option<Box<Frame>>,
}

/// Singly linked stack of frame identifiers, most recent first.
///
/// The stack is created empty. The first push also links in the root frame
/// (`"global"` by default) underneath, so every rendered path ends with it. The
/// root frame is never popped.
#[derive(Debug)]
pub struct CallStack {
    top: Option<Box<Frame>>,
    root_label: &'static str,
    depth: usize,
}

impl CallStack {
    pub fn new(root_label: &'static str) -> Self {
        Self {
            top: None,
            root_label,
            depth: 0,
        }
    }

    /// Whether anything was ever pushed.
    pub fn is_initialized(&self) -> bool {
        self.top.is_some()
    }

    /// Number of frames pushed and not yet popped, root excluded.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn push(&mut self, id: &'static str) {
        if self.top.is_none() {
            self.top = Some(Box::new(Frame {
                id: self.root_label,
                next: None,
            }));
        }

        let next = self.top.take();
        self.top = Some(Box::new(Frame { id, next }));
        self.depth += 1;
    }

    /// Removes the most recent frame and returns its identifier.
    ///
    /// Fails with [`TraceError::StackUnderflow`] when only the root frame is
    /// left or nothing was pushed yet.
    pub fn try_pop(&mut self) -> Result<&'static str> {
        match self.top.take() {
            Some(frame) if frame.next.is_some() => {
                let Frame { id, next } = *frame;
                self.top = next;
                self.depth -= 1;
                Ok(id)
            }
            top => {
                self.top = top;
                Err(TraceError::StackUnderflow)
            }
        }
    }

    /// Identifiers from the top of the stack down to the root.
    pub fn frames(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::successors(self.top.as_deref(), |frame| frame.next.as_deref())
            .map(|frame| frame.id)
    }

    /// Joins identifiers top-down with `config.separator`.
    ///
    /// The result is always shorter than `config.max_chars` and holds at most
    /// `config.max_frames` segments, with the floors of
    /// [`TraceConfig::frame_limit`] and [`TraceConfig::char_limit`]. Older
    /// frames that do not fit are dropped.
    pub fn render(&self, config: &TraceConfig) -> String {
        let limit = config.char_limit();
        let Some(top) = self.top.as_deref() else {
            return truncate(self.root_label, limit).to_string();
        };

        let max_frames = config.frame_limit();
        let separator_len = config.separator.len_utf8();

        let mut out = String::with_capacity(limit);
        out.push_str(truncate(top.id, limit));

        let mut segments = 1;
        let mut node = top.next.as_deref();
        while let Some(frame) = node {
            if segments >= max_frames || out.len() + separator_len + frame.id.len() > limit {
                break;
            }
            out.push(config.separator);
            out.push_str(frame.id);
            segments += 1;
            node = frame.next.as_deref();
        }

        out
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new(TraceConfig::ROOT_LABEL)
    }
}

impl Drop for CallStack {
    fn drop(&mut self) {
        // Unlink iteratively, a recursive Box drop overflows on deep stacks.
        let mut next = self.top.take();
        while let Some(mut frame) = next {
            next = frame.next.take();
        }
    }
}

fn truncate(id: &str, limit: usize) -> &str {
    if id.len() <= limit {
        return id;
    }
    let mut end = limit;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    &id[..end]
}
