//! Machine-format readers/writers: plain binary, one-byte-per-line text
//! (an 8-character binary string per instruction), and Intel HEX.

/// Render each byte as an 8-character binary string, one per line —
/// the "text" machine format named in the external interfaces.
pub fn to_binary_text(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:08b}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn from_binary_text(text: &str) -> Result<Vec<u8>, HexFmtError> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| u8::from_str_radix(l.trim(), 2).map_err(|_| HexFmtError::BadBinaryLine(l.to_string())))
        .collect()
}

/// Pad (or truncate) to the full 65,536-byte program memory image.
pub fn to_binary_image(bytes: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; 65536];
    let n = bytes.len().min(65536);
    image[..n].copy_from_slice(&bytes[..n]);
    image
}

#[derive(Debug, thiserror::Error)]
pub enum HexFmtError {
    #[error("malformed binary-text line: {0}")]
    BadBinaryLine(String),
}

const DATA_RECORD: u8 = 0x00;
const EOF_RECORD: u8 = 0x01;
const MAX_RECORD_BYTES: usize = 16;

fn checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    (!(sum as u8)).wrapping_add(1)
}

fn format_record(addr: u16, rec_type: u8, data: &[u8]) -> String {
    let mut bytes = vec![data.len() as u8, (addr >> 8) as u8, (addr & 0xFF) as u8, rec_type];
    bytes.extend_from_slice(data);
    let cksum = checksum(&bytes);
    format!(":{}{:02X}", hex::encode_upper(&bytes), cksum)
}

/// Serialize bytes at sequential addresses starting at 0 into Intel HEX,
/// chunked into 16-byte data records, followed by a single EOF record.
pub fn to_intel_hex(bytes: &[u8]) -> String {
    let mut lines = Vec::new();
    for (chunk_idx, chunk) in bytes.chunks(MAX_RECORD_BYTES).enumerate() {
        let addr = (chunk_idx * MAX_RECORD_BYTES) as u16;
        lines.push(format_record(addr, DATA_RECORD, chunk));
    }
    lines.push(format_record(0, EOF_RECORD, &[]));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_text_round_trips() {
        let bytes = vec![0x50, 0x01, 0xFF];
        let text = to_binary_text(&bytes);
        assert_eq!(from_binary_text(&text).unwrap(), bytes);
    }

    #[test]
    fn intel_hex_has_a_terminating_eof_record() {
        let hex_str = to_intel_hex(&[0x3E, 0x32]);
        assert!(hex_str.lines().last().unwrap().ends_with("00000001FF"));
    }

    #[test]
    fn intel_hex_data_record_checksum_is_correct() {
        // :02 0000 00 3E32 -> sum=0x02+0+0+0+0x3E+0x32=0x72, checksum=0x8E
        let hex_str = to_intel_hex(&[0x3E, 0x32]);
        let first = hex_str.lines().next().unwrap();
        assert_eq!(first, ":020000003E328E");
    }
}
