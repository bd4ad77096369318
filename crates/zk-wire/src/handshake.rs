// Session handshake. Neither direction carries a request id.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    BOOL_SIZE, INT_SIZE, LENGTH_SIZE, LONG_SIZE, Result, read_i32, read_i64, read_length_prefixed,
    write_bytes,
};

pub const PROTOCOL_VERSION: i32 = 0;
pub const PASSWORD_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub protocol_version: i32,
    pub last_zxid_seen: i64,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub password: Bytes,
    pub read_only: bool,
}

impl ConnectRequest {
    pub fn new_session(timeout_ms: i32, read_only: bool) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            last_zxid_seen: 0,
            timeout_ms,
            session_id: 0,
            password: Bytes::from_static(&[0; PASSWORD_LEN]),
            read_only,
        }
    }

    pub fn resume(
        timeout_ms: i32,
        read_only: bool,
        session_id: i64,
        password: Bytes,
        last_zxid_seen: i64,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            last_zxid_seen,
            timeout_ms,
            session_id,
            password,
            read_only,
        }
    }

    pub fn is_resume(&self) -> bool {
        self.session_id != 0
    }

    /// Full frame, length prefix included.
    pub fn encode(&self) -> Bytes {
        let body_len = INT_SIZE + LONG_SIZE + INT_SIZE + LONG_SIZE + LENGTH_SIZE + self.password.len() + BOOL_SIZE;
        let mut buf = BytesMut::with_capacity(LENGTH_SIZE + body_len);
        buf.put_i32(body_len as i32);
        buf.put_i32(self.protocol_version);
        buf.put_i64(self.last_zxid_seen);
        buf.put_i32(self.timeout_ms);
        buf.put_i64(self.session_id);
        write_bytes(&mut buf, &self.password);
        buf.put_u8(self.read_only as u8);
        buf.freeze()
    }

    /// Decodes the payload that follows the length prefix.
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let protocol_version = read_i32(&mut payload)?;
        let last_zxid_seen = read_i64(&mut payload)?;
        let timeout_ms = read_i32(&mut payload)?;
        let session_id = read_i64(&mut payload)?;
        let password = read_length_prefixed(&mut payload)?;
        let read_only = payload.has_remaining() && payload.get_u8() != 0;
        Ok(Self {
            protocol_version,
            last_zxid_seen,
            timeout_ms,
            session_id,
            password,
            read_only,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub protocol_version: i32,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub password: Bytes,
    pub read_only: bool,
}

impl ConnectResponse {
    /// A zero session id means the server refused to resume the session.
    pub fn rejected() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            timeout_ms: 0,
            session_id: 0,
            password: Bytes::from_static(&[0; PASSWORD_LEN]),
            read_only: false,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.session_id == 0
    }

    pub fn encode(&self) -> Bytes {
        let body_len = INT_SIZE + INT_SIZE + LONG_SIZE + LENGTH_SIZE + self.password.len() + BOOL_SIZE;
        let mut buf = BytesMut::with_capacity(LENGTH_SIZE + body_len);
        buf.put_i32(body_len as i32);
        buf.put_i32(self.protocol_version);
        buf.put_i32(self.timeout_ms);
        buf.put_i64(self.session_id);
        write_bytes(&mut buf, &self.password);
        buf.put_u8(self.read_only as u8);
        buf.freeze()
    }

    /// Decodes the payload that follows the length prefix. Older servers
    /// omit the trailing read-only flag.
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let protocol_version = read_i32(&mut payload)?;
        let timeout_ms = read_i32(&mut payload)?;
        let session_id = read_i64(&mut payload)?;
        let password = read_length_prefixed(&mut payload)?;
        let read_only = payload.has_remaining() && payload.get_u8() != 0;
        Ok(Self {
            protocol_version,
            timeout_ms,
            session_id,
            password,
            read_only,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_request_is_zeroed() {
        let frame = ConnectRequest::new_session(30_000, false).encode();
        // len | version | zxid | timeout | session | passwd(16) | ro
        assert_eq!(frame.len(), 4 + 4 + 8 + 4 + 8 + 4 + 16 + 1);
        assert_eq!(&frame[..4], &((frame.len() - 4) as i32).to_be_bytes());
        assert_eq!(&frame[16..20], &30_000i32.to_be_bytes());
        assert!(frame[20..28].iter().all(|b| *b == 0));
        let decoded = ConnectRequest::decode(frame.slice(4..)).expect("decode");
        assert!(!decoded.is_resume());
    }

    #[test]
    fn resume_carries_credentials() {
        let request = ConnectRequest::resume(
            10_000,
            true,
            0x1234,
            Bytes::from_static(b"0123456789abcdef"),
            99,
        );
        let decoded = ConnectRequest::decode(request.encode().slice(4..)).expect("decode");
        assert_eq!(decoded, request);
        assert!(decoded.is_resume());
    }

    #[test]
    fn response_without_read_only_flag() {
        let response = ConnectResponse {
            protocol_version: 0,
            timeout_ms: 4000,
            session_id: 7,
            password: Bytes::from_static(&[1; 16]),
            read_only: false,
        };
        let frame = response.encode();
        // drop the length prefix and the trailing flag
        let decoded = ConnectResponse::decode(frame.slice(4..frame.len() - 1)).expect("decode");
        assert_eq!(decoded, response);
        assert!(ConnectResponse::rejected().is_rejected());
    }
}
