use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::ParseError;

const MAX_POINTER_JUMPS: usize = 64;

/// Shared wire helpers for everything that reads or writes a section of
/// a DNS message through a bit reader/writer.
pub trait PacketComponent {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    /// Read with access to the full packet buffer so compression
    /// pointers can be followed.
    fn read_with_buffer<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError>;
}

/// Read a domain name sequentially from `reader`. Compression pointers
/// are resolved against `packet_buf` and terminate the sequential walk.
pub fn read_labels<E: Endianness>(
    reader: &mut BitReader<&[u8], E>,
    packet_buf: &[u8],
) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();

    loop {
        let first_byte = reader.read_var::<u8>(8)?;

        if first_byte == 0 {
            break;
        }

        if (first_byte & 0xC0) == 0xC0 {
            let second_byte = reader.read_var::<u8>(8)?;
            let pointer = ((first_byte as u16 & 0x3F) << 8) | second_byte as u16;
            let mut pointed = read_name_at(packet_buf, pointer as usize)?;
            labels.append(&mut pointed);
            break;
        }

        if first_byte > 63 {
            return Err(ParseError::InvalidLabel);
        }

        let mut label_buf = vec![0; first_byte as usize];
        reader.read_bytes(&mut label_buf)?;
        let label = String::from_utf8(label_buf).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);

        if labels.len() > 127 {
            return Err(ParseError::InvalidLabel);
        }
    }

    Ok(labels)
}

/// Read a domain name from `buf` starting at `pos`, resolving
/// compression pointers against `packet`. Returns the labels and the
/// position in `buf` just past the name.
pub fn read_name_from(
    buf: &[u8],
    mut pos: usize,
    packet: &[u8],
) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut jumps = 0;
    // Source switches to `packet` after the first pointer jump.
    let mut src = buf;
    let mut end_pos = None;

    loop {
        let len = *src.get(pos).ok_or(ParseError::UnexpectedEof)? as usize;

        if len == 0 {
            pos += 1;
            break;
        }

        if (len & 0xC0) == 0xC0 {
            let second = *src.get(pos + 1).ok_or(ParseError::UnexpectedEof)? as usize;
            let pointer = ((len & 0x3F) << 8) | second;
            if end_pos.is_none() {
                end_pos = Some(pos + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(ParseError::PointerLoop);
            }
            src = packet;
            pos = pointer;
            continue;
        }

        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }

        let start = pos + 1;
        let stop = start + len;
        let bytes = src.get(start..stop).ok_or(ParseError::UnexpectedEof)?;
        let label = String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        pos = stop;

        if labels.len() > 127 {
            return Err(ParseError::InvalidLabel);
        }
    }

    Ok((labels, end_pos.unwrap_or(pos)))
}

/// Read a domain name at an absolute packet offset (pointer target).
pub fn read_name_at(packet: &[u8], offset: usize) -> Result<Vec<String>, ParseError> {
    read_name_from(packet, offset, packet).map(|(labels, _)| labels)
}

/// Write a domain name. Compression is never emitted.
pub fn write_labels<E: Endianness>(
    writer: &mut BitWriter<&mut Vec<u8>, E>,
    labels: &[String],
) -> Result<(), ParseError> {
    for label in labels {
        if label.is_empty() {
            continue;
        }
        if label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        writer.write_var::<u8>(8, label.len() as u8)?;
        writer.write_bytes(label.as_bytes())?;
    }
    writer.write_var::<u8>(8, 0)?;
    Ok(())
}

/// Append a name in uncompressed wire form to a byte buffer.
pub fn append_name(out: &mut Vec<u8>, labels: &[String]) -> Result<(), ParseError> {
    for label in labels {
        if label.is_empty() {
            continue;
        }
        if label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// Join labels into a lowercase dotted name for keying and matching.
pub fn canonical_name(labels: &[String]) -> String {
    let mut name = String::with_capacity(64);
    for label in labels {
        if label.is_empty() {
            continue;
        }
        if !name.is_empty() {
            name.push('.');
        }
        for ch in label.chars() {
            name.push(ch.to_ascii_lowercase());
        }
    }
    name
}

/// Split a dotted name into labels, dropping empty segments.
pub fn name_to_labels(name: &str) -> Vec<String> {
    name.trim_end_matches('.')
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_roundtrip() {
        let labels = name_to_labels("example.com.");
        assert_eq!(labels, vec!["example".to_string(), "com".to_string()]);

        let mut out = Vec::new();
        append_name(&mut out, &labels).unwrap();
        assert_eq!(out, b"\x07example\x03com\x00");

        let (parsed, next) = read_name_from(&out, 0, &out).unwrap();
        assert_eq!(parsed, labels);
        assert_eq!(next, out.len());
    }

    #[test]
    fn compression_pointer_resolves_against_packet() {
        // "example.com" at offset 0, then a pointer to it at offset 13.
        let mut packet = Vec::new();
        append_name(&mut packet, &name_to_labels("example.com")).unwrap();
        let pointer_at = packet.len();
        packet.extend_from_slice(&[0xC0, 0x00]);

        let (labels, next) = read_name_from(&packet, pointer_at, &packet).unwrap();
        assert_eq!(canonical_name(&labels), "example.com");
        assert_eq!(next, pointer_at + 2);
    }

    #[test]
    fn pointer_loop_is_rejected() {
        let packet = vec![0xC0, 0x00];
        assert!(matches!(
            read_name_from(&packet, 0, &packet),
            Err(ParseError::PointerLoop)
        ));
    }

    #[test]
    fn canonical_name_lowercases() {
        let labels = vec!["ExAmPle".to_string(), "COM".to_string()];
        assert_eq!(canonical_name(&labels), "example.com");
    }
}
