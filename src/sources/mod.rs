//! Producers feeding framebuffers into the graph.

pub mod movie;
pub mod picture;
pub mod raw;

pub use movie::{
    DropDirection, MediaPlayback, MoviePlayer, MoviePlayerOpts, PlaybackState, PlayerEvent,
    SeekRequest, TickOutcome, TimeObserverId,
};
pub use picture::PictureInput;
pub use raw::{PixelFormat, RawDataInput, RawPixelBuffer};
