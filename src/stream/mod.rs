//! Event stream decoding.
//!
//! Raw chunks from the backend flow through [`FrameDecoder`] into frames, and
//! each frame payload is classified into a [`StreamEvent`].

mod event;
mod frame;

pub use event::{decode_event, frame_to_event, StreamEvent};
pub use frame::{Frame, FrameDecoder, FrameStream, DATA_PREFIX, DONE_SENTINEL};
