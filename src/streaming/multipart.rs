//! `multipart/x-mixed-replace` framing understood natively by browsers

use bytes::{BufMut, Bytes, BytesMut};

/// Boundary string between parts
pub const BOUNDARY: &str = "frame";

/// Response content type announcing the boundary
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// Wraps one JPEG into a multipart part
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    part.put_slice(PART_HEADER);
    part.put_slice(jpeg);
    part.put_slice(PART_TRAILER);
    part.freeze()
}
