//! Background process registry (§4.2): long-running commands started and
//! observed independently of any interactive session.

pub mod buffer;
pub mod registry;

pub use buffer::{LogLine, OutputStream};
pub use registry::{ProcessRecord, ProcessRegistry, ProcessStatus, ProcessSummary};
