//! Finance chat assistant
//!
//! `session` owns the persisted message log and drives one streamed request
//! at a time; `stream` turns the raw response body into text deltas.

pub mod session;
pub mod stream;

pub use session::{ByteStream, ChatSession, ChatTransport, CHAT_ERROR_MESSAGE};
pub use stream::{decode_line, EventStreamDecoder, LineEvent};
