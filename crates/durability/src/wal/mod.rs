//! Write-ahead log: framing (C1 integration), segment writer (C2), and
//! segment reader/replayer (C3).

pub mod frame;
pub mod reader;
pub mod segment;
pub mod writer;
