use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Boxed decoder installed per connection; carries framing state so it is
/// always freshly instantiated, never shared.
pub type BoxedDecoder = Box<dyn Decoder<Item = Bytes, Error = io::Error> + Send>;
/// Boxed encoder installed per connection.
pub type BoxedEncoder = Box<dyn Encoder<Bytes, Error = io::Error> + Send>;

/// Built-in newline-delimited frame decoder. Frames exclude the trailing
/// `\n` (and a preceding `\r` if present).
#[derive(Debug, Default)]
pub struct LineDecoder {
    scanned: usize,
}

impl Decoder for LineDecoder {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if let Some(pos) = src[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline_at = self.scanned + pos;
            let mut line = src.split_to(newline_at + 1);
            self.scanned = 0;
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            return Ok(Some(line.freeze()));
        }
        // remember how far we scanned so a partial frame is not rescanned
        self.scanned = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                // flush the unterminated tail as a final frame
                self.scanned = 0;
                let rest = src.split_to(src.len());
                Ok(Some(rest.freeze()))
            }
        }
    }
}

/// Built-in newline-delimited frame encoder.
#[derive(Debug, Default)]
pub struct LineEncoder;

impl Encoder<Bytes> for LineEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(item.remaining() + 1);
        dst.put(item);
        dst.put_u8(b'\n');
        Ok(())
    }
}
