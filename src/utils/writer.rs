use std::io::{Stdout, Write};

use crate::rules::errors::Error;
use crate::rules::Result;

/// Output indirection so commands can be exercised against an in-memory
/// buffer in tests and stdout in the CLI.
pub struct Writer {
    buffer: WriteBuffer,
}

pub enum WriteBuffer {
    Stdout(Stdout),
    Vec(Vec<u8>),
}

impl Writer {
    pub fn new(buffer: WriteBuffer) -> Self {
        Self { buffer }
    }

    pub fn into_string(self) -> Result<String> {
        match self.buffer {
            WriteBuffer::Stdout(..) => Err(Error::IllegalArguments(
                "stdout-backed writer cannot be read back".to_string(),
            )),
            WriteBuffer::Vec(vec) => {
                String::from_utf8(vec).map_err(|err| Error::IllegalArguments(err.to_string()))
            }
        }
    }

    /// Buffer contents with ANSI escapes removed, for asserting on
    /// colored output.
    pub fn stripped(self) -> Result<String> {
        match self.buffer {
            WriteBuffer::Stdout(..) => Err(Error::IllegalArguments(
                "stdout-backed writer cannot be read back".to_string(),
            )),
            WriteBuffer::Vec(vec) => String::from_utf8(strip_ansi_escapes::strip(vec))
                .map_err(|err| Error::IllegalArguments(err.to_string())),
        }
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.buffer {
            WriteBuffer::Stdout(stdout) => stdout.write(buf),
            WriteBuffer::Vec(vec) => vec.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.buffer {
            WriteBuffer::Stdout(stdout) => stdout.flush(),
            WriteBuffer::Vec(vec) => vec.flush(),
        }
    }
}
