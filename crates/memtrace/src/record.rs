use serde::Serialize;
use std::fmt;

/// What happened to a memory block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Allocated { size: usize },
    Reallocated { new_size: usize },
    Deallocated,
}

/// One traced allocation event.
///
/// `address` is the block's numeric address. It is recorded, never
/// dereferenced. A failed allocation logs `0`. A reallocation logs the block's
/// address from before the call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub file: &'static str,
    pub line: u32,
    pub path: String,
    pub address: usize,
    #[serde(flatten)]
    pub op: Operation,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "File {}, line {}, function {} ",
            self.file, self.line, self.path
        )?;

        match self.op {
            Operation::Allocated { size } => write!(
                f,
                "allocated new memory segment at address {:#x} to of size {}",
                self.address, size
            ),
            Operation::Reallocated { new_size } => write!(
                f,
                "reallocated the memory segment at address {:#x} to a new size {}",
                self.address, new_size
            ),
            Operation::Deallocated => write!(
                f,
                "deallocated the memory segment at address {:#x}",
                self.address
            ),
        }
    }
}
