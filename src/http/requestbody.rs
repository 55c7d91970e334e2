//! Request body for POST/PUT operations, with position tracking for resends.

use crate::base::error::PoolError;
use bytes::Bytes;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};

/// A readable, seekable body source (files, cursors).
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

/// Where the body started, recorded before the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPosition {
    Offset(u64),
    /// Reading the position failed, so the body cannot be rewound.
    FailedTell,
}

/// Request body for HTTP methods that send data.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes.
    Bytes(Bytes),
    /// Rewound to the recorded position before every resend.
    Seekable(Box<dyn SeekRead>),
    /// One-shot reader. A resend after it was read fails.
    Stream { reader: Box<dyn Read + Send>, consumed: bool },
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RequestBody::Seekable(_) => f.write_str("Seekable"),
            RequestBody::Stream { consumed, .. } => f.debug_struct("Stream").field("consumed", consumed).finish(),
        }
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl RequestBody {
    pub fn seekable<R: SeekRead + 'static>(reader: R) -> Self {
        RequestBody::Seekable(Box::new(reader))
    }

    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        RequestBody::Stream { reader: Box::new(reader), consumed: false }
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Record the start position on first use, rewind to `pos` afterwards.
    pub fn set_position(&mut self, pos: Option<BodyPosition>) -> Result<Option<BodyPosition>, PoolError> {
        match pos {
            Some(BodyPosition::Offset(offset)) => {
                if let RequestBody::Seekable(reader) = self {
                    reader.seek(SeekFrom::Start(offset)).map_err(|_| {
                        PoolError::UnrewindableBody(
                            "an error occurred when rewinding request body for redirect/retry".into(),
                        )
                    })?;
                }
                Ok(pos)
            }
            Some(BodyPosition::FailedTell) => Err(PoolError::UnrewindableBody(
                "unable to record file position for rewinding request body during a redirect/retry".into(),
            )),
            None => match self {
                RequestBody::Seekable(reader) => Ok(Some(match reader.stream_position() {
                    Ok(offset) => BodyPosition::Offset(offset),
                    Err(_) => BodyPosition::FailedTell,
                })),
                _ => Ok(None),
            },
        }
    }

    /// Bytes to send for this attempt. Seekable bodies are read from their current position.
    pub fn payload(&mut self) -> Result<Option<Bytes>, PoolError> {
        match self {
            RequestBody::Empty => Ok(None),
            RequestBody::Bytes(b) => Ok(Some(b.clone())),
            RequestBody::Seekable(reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).map_err(|e| PoolError::Body(e.to_string()))?;
                Ok(Some(Bytes::from(buf)))
            }
            RequestBody::Stream { reader, consumed } => {
                if *consumed {
                    return Err(PoolError::UnrewindableBody(
                        "request body stream was already sent and cannot be replayed".into(),
                    ));
                }
                *consumed = true;
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).map_err(|e| PoolError::Body(e.to_string()))?;
                Ok(Some(Bytes::from(buf)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader whose position cannot be queried.
    struct NoTell;

    impl Read for NoTell {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Seek for NoTell {
        fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
            Err(std::io::Error::other("not seekable"))
        }
    }

    #[test]
    fn test_default_is_empty() {
        let mut body = RequestBody::default();
        assert!(body.is_empty());
        assert_eq!(body.payload().unwrap(), None);
    }

    #[test]
    fn test_bytes_resend_identical() {
        let mut body: RequestBody = "hello world".into();
        assert_eq!(body.set_position(None).unwrap(), None);
        assert_eq!(body.payload().unwrap().unwrap(), "hello world");
        assert_eq!(body.payload().unwrap().unwrap(), "hello world");
    }

    #[test]
    fn test_seekable_rewinds_to_recorded_offset() {
        let mut cursor = Cursor::new(b"skip:payload".to_vec());
        cursor.set_position(5);
        let mut body = RequestBody::seekable(cursor);

        let pos = body.set_position(None).unwrap();
        assert_eq!(pos, Some(BodyPosition::Offset(5)));
        assert_eq!(body.payload().unwrap().unwrap(), "payload");

        body.set_position(pos).unwrap();
        assert_eq!(body.payload().unwrap().unwrap(), "payload");
    }

    #[test]
    fn test_failed_tell_is_unrewindable() {
        let mut body = RequestBody::seekable(NoTell);
        let pos = body.set_position(None).unwrap();
        assert_eq!(pos, Some(BodyPosition::FailedTell));
        assert!(matches!(body.set_position(pos), Err(PoolError::UnrewindableBody(_))));
    }

    #[test]
    fn test_stream_sent_once() {
        let mut body = RequestBody::stream(Cursor::new(b"once".to_vec()));
        assert_eq!(body.payload().unwrap().unwrap(), "once");
        assert!(matches!(body.payload(), Err(PoolError::UnrewindableBody(_))));
    }
}
