//! Parameter decoding for packed event buffers.
//!
//! Locates the Nth parameter by walking the u16 length array in the buffer
//! header, then reads fixed-width little-endian values or NUL-terminated
//! strings out of the payload region. Malformed buffers yield `None`; the
//! caller degrades per-field instead of failing the event.

use super::Event;

/// Returns the raw bytes of parameter `n`, or `None` if the buffer is too
/// short or holds fewer than `n + 1` parameters.
pub fn param(evt: &Event, n: usize) -> Option<&[u8]> {
    let buf = evt.buf();
    let nparams = u32::from_le_bytes(buf.get(0..4)?.try_into().ok()?) as usize;
    if n >= nparams {
        return None;
    }

    let lens_end = 4 + nparams * 2;
    let lens = buf.get(4..lens_end)?;

    let mut offset = 0usize;
    for j in 0..n {
        offset += u16::from_le_bytes([lens[j * 2], lens[j * 2 + 1]]) as usize;
    }
    let len = u16::from_le_bytes([lens[n * 2], lens[n * 2 + 1]]) as usize;

    buf.get(lens_end + offset..lens_end + offset + len)
}

/// Reads parameter `n` as a little-endian i64.
pub fn param_i64(evt: &Event, n: usize) -> Option<i64> {
    let raw = param(evt, n)?;
    Some(i64::from_le_bytes(raw.get(0..8)?.try_into().ok()?))
}

/// Reads parameter `n` as a little-endian u64.
pub fn param_u64(evt: &Event, n: usize) -> Option<u64> {
    let raw = param(evt, n)?;
    Some(u64::from_le_bytes(raw.get(0..8)?.try_into().ok()?))
}

/// Reads parameter `n` as a little-endian u32.
pub fn param_u32(evt: &Event, n: usize) -> Option<u32> {
    let raw = param(evt, n)?;
    Some(u32::from_le_bytes(raw.get(0..4)?.try_into().ok()?))
}

/// Reads parameter `n` as a NUL-terminated string. The terminator is
/// optional; without one the whole parameter is taken.
pub fn param_str(evt: &Event, n: usize) -> Option<String> {
    let raw = param(evt, n)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Some(String::from_utf8_lossy(&raw[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCode;

    fn sample_event() -> Event {
        Event::from_params(
            42,
            EventCode::Openat,
            &[
                &7i64.to_le_bytes(),
                &(-100i64).to_le_bytes(),
                b"/etc/hosts\0",
                &0o644u32.to_le_bytes(),
            ],
        )
    }

    #[test]
    fn test_param_offsets() {
        let evt = sample_event();
        assert_eq!(param(&evt, 0).map(<[u8]>::len), Some(8));
        assert_eq!(param(&evt, 2).map(<[u8]>::len), Some(11));
        assert!(param(&evt, 4).is_none());
    }

    #[test]
    fn test_typed_reads() {
        let evt = sample_event();
        assert_eq!(param_i64(&evt, 0), Some(7));
        assert_eq!(param_i64(&evt, 1), Some(-100));
        assert_eq!(param_str(&evt, 2).as_deref(), Some("/etc/hosts"));
        assert_eq!(param_u32(&evt, 3), Some(0o644));
    }

    #[test]
    fn test_string_without_terminator() {
        let evt = Event::from_params(1, EventCode::Open, &[b"/tmp/raw"]);
        assert_eq!(param_str(&evt, 0).as_deref(), Some("/tmp/raw"));
    }

    #[test]
    fn test_short_fixed_width_param() {
        // A 4-byte parameter cannot satisfy an 8-byte read.
        let evt = Event::from_params(1, EventCode::Open, &[&5u32.to_le_bytes()]);
        assert_eq!(param_i64(&evt, 0), None);
        assert_eq!(param_u32(&evt, 0), Some(5));
    }

    #[test]
    fn test_truncated_buffer() {
        // Claims 3 params but carries no length array.
        let evt = Event::from_raw(1, EventCode::Open, 3u32.to_le_bytes().to_vec());
        assert!(param(&evt, 0).is_none());
    }
}
