//! Binary envelope for hub requests
//!
//! Every request body is a fixed-size little-endian frame followed by the
//! UTF-8 XML payload:
//!
//! ```text
//! offset 0  u32 LE  length of everything after this field (4 + payload)
//! offset 4  u16 LE  protocol version
//! offset 6  u16 LE  action code
//! offset 8  ...     payload bytes
//! ```

/// Protocol version sent on every call
pub const PROTOCOL_VERSION: u16 = 1;

/// Action code for script queries (by id and by user/type)
pub const ACTION_SCRIPT_QUERY: u16 = 403;

/// Action code for sensor batch queries
pub const ACTION_SENSOR_QUERY: u16 = 219;

/// Encode a request frame around an XML payload
pub fn encode_frame(version: u16, action: u16, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + payload.len());
    // The length field covers the version/action tail plus the payload
    body.extend_from_slice(&(payload.len() as u32 + 4).to_le_bytes());
    body.extend_from_slice(&version.to_le_bytes());
    body.extend_from_slice(&action.to_le_bytes());
    body.extend_from_slice(payload);
    body
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_is_byte_exact() {
        let body = encode_frame(1, 403, b"<DB/>");

        // length = 5 payload bytes + 4 tail bytes
        assert_eq!(&body[0..4], &9u32.to_le_bytes());
        assert_eq!(&body[4..6], &1u16.to_le_bytes());
        assert_eq!(&body[6..8], &403u16.to_le_bytes());
        assert_eq!(&body[8..], b"<DB/>");
        assert_eq!(body.len(), 13);
    }

    #[test]
    fn empty_payload_still_counts_the_tail() {
        let body = encode_frame(1, 219, b"");
        assert_eq!(&body[0..4], &4u32.to_le_bytes());
        assert_eq!(body.len(), 8);
    }

    #[test]
    fn multibyte_payload_length_is_little_endian() {
        let payload = vec![b'x'; 0x0201];
        let body = encode_frame(1, 403, &payload);
        // 0x0201 + 4 = 0x0205 -> bytes 05 02 00 00
        assert_eq!(&body[0..4], &[0x05, 0x02, 0x00, 0x00]);
    }
}
