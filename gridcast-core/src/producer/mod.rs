//! Producer side: capture a source surface, boil it down to panel
//! frames, and stream the differences.

pub mod capture;
pub mod encoder;
pub mod pipeline;
pub mod transport;

pub use capture::{downsample, CaptureSlot, CaptureThrottle, PixelFormat, SourceFrame};
pub use encoder::{FrameEncoder, Outgoing};
pub use pipeline::{StreamConfig, StreamService};
pub use transport::{NetOwnership, PanelClient, TransportConfig};
