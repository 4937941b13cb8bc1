//! Media inspection and external tool plumbing

pub mod command;
pub mod probe;

pub use command::{run_ffmpeg, run_tool, ToolError, ToolOutput};
pub use probe::{probe, probe_video_params, MediaAsset, VideoParams};
