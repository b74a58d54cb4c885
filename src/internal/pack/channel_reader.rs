//! Adapts a byte-chunk channel into a synchronous `Read`/`BufRead`, so
//! `Pack::decode` can consume pack bytes arriving incrementally (e.g. from a
//! receive-pack network stream copied onto a blocking channel) without
//! buffering the whole pack up front.

use std::io::{self, BufRead, Read};
use std::sync::mpsc::Receiver;

pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
    done: bool,
}

impl ChannelReader {
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    fn refill(&mut self) {
        if self.pos < self.buf.len() || self.done {
            return;
        }
        match self.rx.recv() {
            Ok(chunk) => {
                self.buf = chunk;
                self.pos = 0;
            }
            Err(_) => self.done = true,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let avail = self.fill_buf()?;
        let n = avail.len().min(out.len());
        out[..n].copy_from_slice(&avail[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for ChannelReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.refill();
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos += amt;
    }
}
