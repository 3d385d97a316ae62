pub mod decode;

use std::fmt;

/// EventCode identifies the kind of syscall exit event delivered by the
/// host capture layer. Values must match the host's event table; only exit
/// codes appear here because the plugin never subscribes to enter events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventCode {
    Open = 3,
    Connect = 23,
    Creat = 81,
    Clone = 223,
    Accept = 247,
    Execve = 293,
    Openat = 307,
    OpenByHandleAt = 329,
    Execveat = 331,
    Clone3 = 335,
    Openat2 = 337,
    Accept4 = 399,
}

impl EventCode {
    /// Returns the canonical log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Connect => "connect",
            Self::Creat => "creat",
            Self::Clone => "clone",
            Self::Accept => "accept",
            Self::Execve => "execve",
            Self::Openat => "openat",
            Self::OpenByHandleAt => "open_by_handle_at",
            Self::Execveat => "execveat",
            Self::Clone3 => "clone3",
            Self::Openat2 => "openat2",
            Self::Accept4 => "accept4",
        }
    }

    /// Convert from a raw event-table value.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            3 => Some(Self::Open),
            23 => Some(Self::Connect),
            81 => Some(Self::Creat),
            223 => Some(Self::Clone),
            247 => Some(Self::Accept),
            293 => Some(Self::Execve),
            307 => Some(Self::Openat),
            329 => Some(Self::OpenByHandleAt),
            331 => Some(Self::Execveat),
            335 => Some(Self::Clone3),
            337 => Some(Self::Openat2),
            399 => Some(Self::Accept4),
            _ => None,
        }
    }

    /// Event types whose result parameter carries a new file descriptor.
    pub const fn produces_fd(self) -> bool {
        matches!(
            self,
            Self::Open
                | Self::Creat
                | Self::Openat
                | Self::Openat2
                | Self::OpenByHandleAt
                | Self::Accept
                | Self::Accept4
                | Self::Connect
        )
    }

    /// Parameter slot holding the produced fd, or `None` for event types
    /// that do not produce one. `connect` reports its fd in slot 2; every
    /// other fd-producing type uses slot 0.
    pub const fn fd_param_slot(self) -> Option<usize> {
        match self {
            Self::Connect => Some(2),
            _ if self.produces_fd() => Some(0),
            _ => None,
        }
    }

    /// Socket event types, which have no raw-buffer path fallback.
    pub const fn is_socket(self) -> bool {
        matches!(self, Self::Accept | Self::Accept4 | Self::Connect)
    }

    /// Event types accepted for any behavior profile: the fd-producing set
    /// plus the process-lifecycle events.
    pub const fn supported_for_profiles(self) -> bool {
        self.produces_fd()
            || matches!(self, Self::Execve | Self::Execveat | Self::Clone | Self::Clone3)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured syscall exit event as handed over by the host: the
/// originating thread id, the event type, and the packed parameter buffer.
///
/// The packed layout is a u32 parameter count, then `nparams` little-endian
/// u16 lengths, then the parameter payloads concatenated in order.
#[derive(Debug, Clone)]
pub struct Event {
    pub tid: i64,
    pub code: EventCode,
    payload: Vec<u8>,
}

impl Event {
    /// Pack an event from its parameter list.
    pub fn from_params(tid: i64, code: EventCode, params: &[&[u8]]) -> Self {
        let payload_len: usize = params.iter().map(|p| p.len()).sum();
        let mut payload = Vec::with_capacity(4 + params.len() * 2 + payload_len);

        payload.extend_from_slice(&(params.len() as u32).to_le_bytes());
        for p in params {
            payload.extend_from_slice(&(p.len() as u16).to_le_bytes());
        }
        for p in params {
            payload.extend_from_slice(p);
        }

        Self { tid, code, payload }
    }

    /// Wrap an already-packed parameter buffer.
    pub fn from_raw(tid: i64, code: EventCode, payload: Vec<u8>) -> Self {
        Self { tid, code, payload }
    }

    /// The packed parameter buffer.
    pub fn buf(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_code_roundtrip() {
        for code in [
            EventCode::Open,
            EventCode::Connect,
            EventCode::Creat,
            EventCode::Clone,
            EventCode::Accept,
            EventCode::Execve,
            EventCode::Openat,
            EventCode::OpenByHandleAt,
            EventCode::Execveat,
            EventCode::Clone3,
            EventCode::Openat2,
            EventCode::Accept4,
        ] {
            assert_eq!(EventCode::from_u32(code as u32), Some(code));
        }
        assert_eq!(EventCode::from_u32(0), None);
        assert_eq!(EventCode::from_u32(9999), None);
    }

    #[test]
    fn test_fd_param_slot() {
        assert_eq!(EventCode::Connect.fd_param_slot(), Some(2));
        assert_eq!(EventCode::Open.fd_param_slot(), Some(0));
        assert_eq!(EventCode::Accept4.fd_param_slot(), Some(0));
        assert_eq!(EventCode::Execve.fd_param_slot(), None);
        assert_eq!(EventCode::Clone3.fd_param_slot(), None);
    }

    #[test]
    fn test_profile_support_sets() {
        assert!(EventCode::Execve.supported_for_profiles());
        assert!(!EventCode::Execve.produces_fd());
        assert!(EventCode::Openat2.produces_fd());
        assert!(EventCode::Connect.is_socket());
        assert!(!EventCode::Openat.is_socket());
    }

    #[test]
    fn test_event_code_display() {
        assert_eq!(EventCode::Execve.to_string(), "execve");
        assert_eq!(EventCode::OpenByHandleAt.to_string(), "open_by_handle_at");
    }
}
