/// Limits and labels used when rendering the call path.
///
/// The defaults reproduce the fixed 100-byte trace buffer of the classic C
/// tracer: at most 50 frames, and a rendered path always shorter than
/// `max_chars`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceConfig {
    pub max_frames: usize,
    pub max_chars: usize,
    pub root_label: &'static str,
    pub separator: char,
}

impl TraceConfig {
    pub const DEFAULT_MAX_FRAMES: usize = 50;
    pub const DEFAULT_MAX_CHARS: usize = 100;
    pub const ROOT_LABEL: &'static str = "global";
    /// A path always shows at least the innermost frame.
    pub const MIN_FRAMES: usize = 1;
    /// Room for one character plus the terminator slot.
    pub const MIN_CHARS: usize = 2;

    /// Clamped to [`Self::MIN_FRAMES`].
    pub fn max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames.max(Self::MIN_FRAMES);
        self
    }

    /// Clamped to [`Self::MIN_CHARS`].
    pub fn max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(Self::MIN_CHARS);
        self
    }

    /// Frame cap actually applied, even when the field was set directly.
    pub fn frame_limit(&self) -> usize {
        self.max_frames.max(Self::MIN_FRAMES)
    }

    /// Longest rendered path in bytes, one less than the effective `max_chars`.
    pub fn char_limit(&self) -> usize {
        self.max_chars.max(Self::MIN_CHARS) - 1
    }

    pub fn root_label(mut self, root_label: &'static str) -> Self {
        self.root_label = root_label;
        self
    }

    pub fn separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_frames: Self::DEFAULT_MAX_FRAMES,
            max_chars: Self::DEFAULT_MAX_CHARS,
            root_label: Self::ROOT_LABEL,
            separator: ':',
        }
    }
}

/// Encoding of log lines written by the CLI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Json,
}
