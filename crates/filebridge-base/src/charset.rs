//! Text <-> bytes conversion for load/save.

use std::io;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};

use crate::model::FileParams;

/// Decode `bytes` with the requested charset.
///
/// BOM sniffing is disabled so a save/load pair returns the exact text,
/// including a leading U+FEFF. Malformed sequences become U+FFFD.
pub fn decode(bytes: &[u8], params: &FileParams) -> String {
    let (text, _) = params.charset.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Whether `encode` can write `charset` so that `decode` reads the same text
/// back. encoding_rs substitutes UTF-8 output for encodings it cannot write,
/// such as `replacement`.
pub fn is_encodable(charset: &'static Encoding) -> bool {
    charset == UTF_16LE || charset == UTF_16BE || charset.output_encoding() == charset
}

/// Encode `text` with the requested charset.
///
/// Fails with `InvalidData` when the text contains characters the charset
/// cannot represent, or when the charset cannot be written at all.
pub fn encode(text: &str, params: &FileParams) -> io::Result<Vec<u8>> {
    let charset = params.charset;

    // encoding_rs only encodes to ASCII-compatible output encodings.
    if charset == UTF_16LE {
        return Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    if charset == UTF_16BE {
        return Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }
    if !is_encodable(charset) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("cannot write text as {}", charset.name()),
        ));
    }

    let (bytes, _, unmappable) = charset.encode(text);
    if unmappable {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("text is not representable in {}", charset.name()),
        ));
    }
    Ok(bytes.into_owned())
}
