//! Payload compiled into the stub at build time.

static EMBEDDED_PAYLOAD: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/embedded_payload.bin"));

/// The compiled-in archive, `None` for a plain template build.
pub fn fallback_payload() -> Option<&'static [u8]> {
    if EMBEDDED_PAYLOAD.is_empty() {
        None
    } else {
        Some(EMBEDDED_PAYLOAD)
    }
}
