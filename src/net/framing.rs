/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Length-prefixed frames over a stream transport.
//!
//! A frame is a 4-byte big-endian length followed by the message body. Framing is
//! independent of authentication; trust is established by the challenge handshake,
//! not the transport.

use std::io::{self, Read, Write};

use crate::error::Fault;
use crate::messages::Message;

/// Frames above this size are fatal for the connection that sent them.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Why reading a frame failed.
#[derive(Debug)]
pub enum FrameError {
    /// The underlying stream failed or closed.
    Io(io::Error),

    /// The frame or its body violated the protocol; the connection must close.
    Bad(Fault),
}

/// Write one message as a frame.
pub fn write_frame(stream: &mut impl Write, message: &Message) -> io::Result<()> {
    let body = message.encode();
    if body.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "frame exceeds maximum size",
        ));
    }
    stream.write_all(&(body.len() as u32).to_be_bytes())?;
    stream.write_all(&body)?;
    stream.flush()
}

/// Read one frame and decode its message body.
pub fn read_frame(stream: &mut impl Read) -> Result<Message, FrameError> {
    let mut length_bytes = [0u8; 4];
    stream.read_exact(&mut length_bytes).map_err(FrameError::Io)?;
    let length = u32::from_be_bytes(length_bytes) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::Bad(Fault::BadFormat("oversize frame")));
    }
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).map_err(FrameError::Io)?;
    Message::decode(&body).map_err(FrameError::Bad)
}
