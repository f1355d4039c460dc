//! Remote-protocol framing: `$data#ck` packets, acks and break requests.

use common::util::ByteQueue;

/// The interrupt byte a debugger sends to stop the target (Ctrl-C).
const BREAK_REQUEST: u8 = 0x03;

/// Something the debugger sent us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A well-formed packet payload.
    Packet(Vec<u8>),
    /// An out-of-band interrupt request.
    Interrupt,
    /// A packet that failed its checksum and should be nak'd.
    BadPacket,
}

/// Incremental decoder for the debugger byte stream.
///
/// Bytes arrive in arbitrary chunks from a non-blocking socket; the decoder
/// buffers them and hands out complete events.
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: ByteQueue,
}

impl Decoder {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.push_slice(bytes);
    }

    /// Extracts the next complete event from the buffer, if any.
    pub fn next_event(&mut self) -> Option<Event> {
        loop {
            let mut op = self.buffer.read();
            let first = op.read_byte()?;

            match first {
                // acknowledgements require no action on our side
                b'+' | b'-' => {
                    op.consume();
                    continue;
                }
                BREAK_REQUEST => {
                    op.consume();
                    return Some(Event::Interrupt);
                }
                b'$' => {
                    let body = op.remaining();
                    let Some(hash) = body.iter().position(|&b| b == b'#') else {
                        // incomplete: wait for more bytes
                        return None;
                    };

                    if body.len() < hash + 3 {
                        return None;
                    }

                    let payload = body[..hash].to_vec();
                    let expected = [body[hash + 1], body[hash + 2]];
                    let actual = checksum(&payload);

                    op.skip(hash + 3);
                    op.consume();

                    let ok = decode_hex_byte(&expected) == Some(actual);
                    return Some(if ok {
                        Event::Packet(payload)
                    } else {
                        Event::BadPacket
                    });
                }
                _ => {
                    // garbage between packets, drop it
                    op.consume();
                    continue;
                }
            }
        }
    }
}

/// Mod-256 sum of the payload bytes.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Wraps a payload in a `$data#ck` frame.
pub fn frame(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    out.push(b'$');
    out.extend_from_slice(data);
    out.push(b'#');
    out.extend_from_slice(format!("{:02x}", checksum(data)).as_bytes());
    out
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn decode_hex_byte(pair: &[u8]) -> Option<u8> {
    Some((decode_hex_nibble(pair[0])? << 4) | decode_hex_nibble(pair[1])?)
}

/// Decodes a hex string into bytes. Fails on odd length or non-hex digits.
pub fn decode_hex(text: &[u8]) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }

    text.chunks(2).map(decode_hex_byte).collect()
}

/// Encodes bytes as a lowercase hex string.
pub fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        _ = write!(out, "{byte:02x}");
    }

    out
}

/// Parses a hex integer field out of a packet body.
pub fn parse_hex(text: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(text).ok()?;
    u64::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod test {
    use super::{Decoder, Event, checksum, decode_hex, encode_hex, frame, parse_hex};

    #[test]
    fn frames_are_checksummed() {
        assert_eq!(frame(b"OK"), b"$OK#9a".to_vec());
        assert_eq!(checksum(b"OK"), 0x9a);
    }

    #[test]
    fn decodes_a_packet() {
        let mut decoder = Decoder::default();
        decoder.extend(b"$qSupported#37");

        assert_eq!(
            decoder.next_event(),
            Some(Event::Packet(b"qSupported".to_vec()))
        );
        assert_eq!(decoder.next_event(), None);
    }

    #[test]
    fn decodes_across_chunks() {
        let mut decoder = Decoder::default();
        decoder.extend(b"+$qSup");
        assert_eq!(decoder.next_event(), None);

        decoder.extend(b"ported#3");
        assert_eq!(decoder.next_event(), None);

        decoder.extend(b"7$");
        assert_eq!(
            decoder.next_event(),
            Some(Event::Packet(b"qSupported".to_vec()))
        );
        assert_eq!(decoder.next_event(), None);
    }

    #[test]
    fn bad_checksum_is_reported() {
        let mut decoder = Decoder::default();
        decoder.extend(b"$qSupported#00");
        assert_eq!(decoder.next_event(), Some(Event::BadPacket));
    }

    #[test]
    fn interrupt_between_packets() {
        let mut decoder = Decoder::default();
        decoder.extend(b"\x03$OK#9a");
        assert_eq!(decoder.next_event(), Some(Event::Interrupt));
        assert_eq!(decoder.next_event(), Some(Event::Packet(b"OK".to_vec())));
    }

    #[test]
    fn hex_codecs() {
        assert_eq!(encode_hex(&[0xde, 0xad]), "dead");
        assert_eq!(decode_hex(b"dead"), Some(vec![0xde, 0xad]));
        assert_eq!(decode_hex(b"dea"), None);
        assert_eq!(decode_hex(b"zz"), None);
        assert_eq!(parse_hex(b"1f"), Some(0x1f));
        assert_eq!(parse_hex(b""), None);
    }
}
