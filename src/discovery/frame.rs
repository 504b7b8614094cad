//! Wire frame for the multicast discovery exchange (spec §4.C).
//!
//! ```text
//! u32 magic-or-message-code
//! u16 name-length (UTF-16 code units)
//! u16[name-length] hostname/address characters
//! u8  ssl-enabled (0 or 1)
//! u32 tcp-port
//! ```
//! All integers are big-endian, matching the teacher crate's `header.rs`
//! convention of explicit `to_be_bytes`/`from_be_bytes` rather than a
//! derive-based codec, since this is a tiny fixed frame.

use std::fmt;

pub const MAX_FRAME_LEN: usize = 4 + 2 + (u16::MAX as usize) * 2 + 1 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFrame {
    pub code: u32,
    pub hostname: String,
    pub ssl_enabled: bool,
    pub tcp_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooShort,
    TruncatedName,
    InvalidUtf16,
    HostnameTooLong,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "frame shorter than the fixed header"),
            FrameError::TruncatedName => write!(f, "frame truncated inside the hostname field"),
            FrameError::InvalidUtf16 => write!(f, "hostname is not valid UTF-16"),
            FrameError::HostnameTooLong => write!(f, "hostname exceeds u16 code-unit length"),
        }
    }
}

impl std::error::Error for FrameError {}

impl DiscoveryFrame {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let units: Vec<u16> = self.hostname.encode_utf16().collect();
        if units.len() > u16::MAX as usize {
            return Err(FrameError::HostnameTooLong);
        }
        let mut buf = Vec::with_capacity(4 + 2 + units.len() * 2 + 1 + 4);
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.extend_from_slice(&(units.len() as u16).to_be_bytes());
        for unit in units {
            buf.extend_from_slice(&unit.to_be_bytes());
        }
        buf.push(self.ssl_enabled as u8);
        buf.extend_from_slice(&(self.tcp_port as u32).to_be_bytes());
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 4 + 2 {
            return Err(FrameError::TooShort);
        }
        let code = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let name_len = u16::from_be_bytes(buf[4..6].try_into().unwrap()) as usize;
        let name_end = 6 + name_len * 2;
        if buf.len() < name_end + 1 + 4 {
            return Err(FrameError::TruncatedName);
        }
        let units: Vec<u16> = buf[6..name_end]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        let hostname = String::from_utf16(&units).map_err(|_| FrameError::InvalidUtf16)?;
        let ssl_enabled = buf[name_end] != 0;
        let port_bytes = &buf[name_end + 1..name_end + 5];
        let tcp_port = u32::from_be_bytes(port_bytes.try_into().unwrap()) as u16;
        Ok(Self {
            code,
            hostname,
            ssl_enabled,
            tcp_port,
        })
    }

    /// True when the first 4 bytes of `buf` match `expected_code`, without
    /// fully decoding the frame (used by the responder to cheaply filter
    /// datagrams that aren't discovery requests).
    pub fn has_code(buf: &[u8], expected_code: u32) -> bool {
        buf.len() >= 4 && u32::from_be_bytes(buf[0..4].try_into().unwrap()) == expected_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let frame = DiscoveryFrame {
            code: 120,
            hostname: "replica-07.internal".to_string(),
            ssl_enabled: true,
            tcp_port: 7777,
        };
        let encoded = frame.encode().unwrap();
        let decoded = DiscoveryFrame::decode(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = DiscoveryFrame {
            code: 150,
            hostname: "x".to_string(),
            ssl_enabled: false,
            tcp_port: 1,
        };
        let mut encoded = frame.encode().unwrap();
        encoded.truncate(encoded.len() - 1);
        assert!(DiscoveryFrame::decode(&encoded).is_err());
    }

    #[test]
    fn has_code_checks_only_the_prefix() {
        let frame = DiscoveryFrame {
            code: 230,
            hostname: String::new(),
            ssl_enabled: false,
            tcp_port: 4445,
        };
        let encoded = frame.encode().unwrap();
        assert!(DiscoveryFrame::has_code(&encoded, 230));
        assert!(!DiscoveryFrame::has_code(&encoded, 235));
    }
}
