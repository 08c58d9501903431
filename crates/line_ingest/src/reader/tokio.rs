use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::{BoundedLine, LineAssembler, CHUNK_SIZE_BYTES};

pub struct AsyncBoundedLineReader<R: AsyncRead + Unpin> {
    reader: R,
    buffer: Box<[u8; CHUNK_SIZE_BYTES]>,
    buffer_pos: usize,
    buffer_len: usize,
    assembler: LineAssembler,
    done: bool,
}

impl<R: AsyncRead + Unpin> AsyncBoundedLineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            buffer: Box::new([0u8; CHUNK_SIZE_BYTES]),
            buffer_pos: 0,
            buffer_len: 0,
            assembler: LineAssembler::new(max_line_bytes),
            done: false,
        }
    }

    /// Waits for the next complete line; `None` once the source is exhausted or failed.
    pub async fn next_line(&mut self) -> Option<BoundedLine> {
        if self.done {
            return None;
        }

        loop {
            if self.buffer_pos >= self.buffer_len {
                match self.reader.read(&mut self.buffer[..]).await {
                    Ok(0) => {
                        self.done = true;
                        return self.assembler.finish_eof();
                    }
                    Ok(n) => {
                        self.buffer_pos = 0;
                        self.buffer_len = n;
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        self.done = true;
                        return Some(self.assembler.io_error(err));
                    }
                }
            }

            let (consumed, line) = self
                .assembler
                .push(&self.buffer[self.buffer_pos..self.buffer_len]);
            self.buffer_pos += consumed;
            if line.is_some() {
                return line;
            }
        }
    }
}
