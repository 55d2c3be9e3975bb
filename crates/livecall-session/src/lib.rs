pub mod protocol;
pub mod session;

pub use protocol::{MediaChunk, ServerMessage, AUDIO_PCM_MIME, IMAGE_JPEG_MIME};
pub use session::{LiveSession, SessionError, SessionEvent, SessionSender};
