//! # vf-av
//!
//! External media tool integration for vidforge.
//!
//! - **Tool discovery** ([`ToolRegistry`]) finds ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) runs a process under a hard
//!   timeout and captures its output as raw bytes.
//! - **Filter building** ([`filters`]) turns a transform request into an
//!   ffmpeg argument vector. Pure, no I/O.
//! - **Transcoding** ([`Transcoder`], [`FfmpegTranscoder`]) runs one
//!   invocation and guarantees no partial output survives a failure.
//! - **Duration probing** ([`DurationProbe`], [`FfprobeDurationProbe`]).

pub mod command;
pub mod filters;
pub mod probe;
pub mod tools;
pub mod transcode;

pub use command::{ToolCommand, ToolOutput};
pub use filters::{build_invocation, output_locator, FilterOptions, Invocation, ResolvedInputs};
pub use probe::{DurationProbe, FfprobeDurationProbe};
pub use tools::{ToolInfo, ToolRegistry};
pub use transcode::{FfmpegTranscoder, Transcoder};
