//! Command encoding.

use bytes::{BufMut, Bytes, BytesMut};

/// Encode a command frame as a RESP array of bulk strings.
pub fn encode_command(frame: &[Bytes]) -> Bytes {
    let payload: usize = frame.iter().map(|part| part.len() + 16).sum();
    let mut buf = BytesMut::with_capacity(16 + payload);

    buf.put_u8(b'*');
    buf.put_slice(frame.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for part in frame {
        buf.put_u8(b'$');
        buf.put_slice(part.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(part);
        buf.put_slice(b"\r\n");
    }

    buf.freeze()
}
