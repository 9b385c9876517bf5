// ── Compressed payload decoding ──
//
// Producers send Base64 (standard alphabet) of a GZIP stream. Some send
// Base64 of the plain JSON text instead; the GZIP magic bytes tell the
// two apart.

use std::io::Read;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;

use crate::error::CoreError;

/// Check if data is gzip compressed (magic bytes check).
#[inline]
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&[0x1f, 0x8b])
}

/// Decode a compressed payload field back to its JSON text.
pub fn decode_compressed(encoded: &str) -> Result<String, CoreError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CoreError::decode(format!("invalid base64: {e}")))?;

    if is_gzip(&bytes) {
        let mut text = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut text)
            .map_err(|e| CoreError::decode(format!("gzip: {e}")))?;
        Ok(text)
    } else {
        String::from_utf8(bytes).map_err(|e| CoreError::decode(format!("not UTF-8: {e}")))
    }
}

#[cfg(test)]
pub(crate) fn encode_compressed(text: &str) -> String {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(text.as_bytes()).unwrap();
    STANDARD.encode(encoder.finish().unwrap())
}
