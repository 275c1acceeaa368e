// src/io/serial/mod.rs
//
// MONOSTICK serial side: CRLF framing, packet decoding and the blocking
// read loop that feeds the sensor channel.

pub mod framer;
pub mod parser;
mod reader;

pub use framer::{FramerOutput, LineFramer, DEFAULT_MAX_FRAME_LENGTH};
pub use parser::{parse_packet, parse_packet_at};
pub use reader::{SerialSession, StreamEnd};
