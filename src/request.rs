//! A unit of CIP work handed from a tag (or the facade) to a session.

use crate::buffer::{ByteBuffer, SharedBuffer};
use crate::cip;
use crate::error::{EipError, Result, Status};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
    GetAttributes,
}

/// What a session hands back for a successful request
#[derive(Debug, Default)]
pub struct Completion {
    /// Reply data (read values, attribute list); `None` for writes
    pub response: Option<SharedBuffer>,
    /// Type descriptor preceding read data
    pub type_info: Vec<u8>,
}

#[derive(Debug)]
struct RequestState {
    status: Status,
    completion: Option<Completion>,
}

pub struct Request {
    id: u64,
    kind: RequestKind,
    service: u8,
    label: String,
    payload: Vec<u8>,
    aborted: AtomicBool,
    state: Mutex<RequestState>,
}

impl Request {
    pub fn new(kind: RequestKind, service: u8, payload: Vec<u8>, label: impl Into<String>) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            service,
            label: label.into(),
            payload,
            aborted: AtomicBool::new(false),
            state: Mutex::new(RequestState {
                status: Status::Pending,
                completion: None,
            }),
        }
    }

    pub fn read(encoded_tag: &[u8], elem_count: u16, label: impl Into<String>) -> Self {
        let mut buf = ByteBuffer::new();
        cip::marshal_cip_read(&mut buf, encoded_tag, elem_count);
        Self::new(RequestKind::Read, cip::SERVICE_READ_TAG, buf.into_vec(), label)
    }

    pub fn write(
        encoded_tag: &[u8],
        type_info: &[u8],
        elem_count: u16,
        data: &[u8],
        label: impl Into<String>,
    ) -> Self {
        let mut buf = ByteBuffer::new();
        cip::marshal_cip_write(&mut buf, encoded_tag, type_info, elem_count, data);
        Self::new(RequestKind::Write, cip::SERVICE_WRITE_TAG, buf.into_vec(), label)
    }

    pub fn get_attribute_list(
        class: u16,
        instance: u16,
        attributes: &[u16],
        label: impl Into<String>,
    ) -> Result<Self> {
        let mut buf = ByteBuffer::new();
        cip::marshal_cip_get_attr_list(&mut buf, class, instance, attributes)?;
        Ok(Self::new(
            RequestKind::GetAttributes,
            cip::SERVICE_GET_ATTRIBUTE_LIST,
            buf.into_vec(),
            label,
        ))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn service(&self) -> u8 {
        self.service
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Embedded CIP request bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn status(&self) -> Status {
        self.state.lock().status.clone()
    }

    pub fn is_done(&self) -> bool {
        !self.state.lock().status.is_pending()
    }

    /// Marks the request abandoned. A session drops it unsent, or discards
    /// its reply if already on the wire.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            let mut state = self.state.lock();
            if state.status.is_pending() {
                state.status = Status::Err(EipError::Abort);
            }
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Records the outcome. The first completion wins; later ones (e.g. a
    /// reply arriving after an abort) are ignored.
    pub fn complete(&self, result: Result<Completion>) -> bool {
        let mut state = self.state.lock();
        if !state.status.is_pending() {
            return false;
        }
        match result {
            Ok(completion) => {
                state.status = Status::Ok;
                state.completion = Some(completion);
            }
            Err(e) => state.status = Status::Err(e),
        }
        true
    }

    /// Takes the successful result; `None` until completed OK, and after the
    /// first call
    pub fn take_completion(&self) -> Option<Completion> {
        self.state.lock().completion.take()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("status", &self.status())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_payload() {
        let req = Request::read(&[0x01, 0x91, 0x00], 2, "t");
        assert_eq!(req.kind(), RequestKind::Read);
        assert_eq!(req.service(), cip::SERVICE_READ_TAG);
        assert_eq!(req.payload(), &[0x4C, 0x01, 0x91, 0x00, 0x02, 0x00]);
        assert!(req.status().is_pending());
    }

    #[test]
    fn test_first_completion_wins() {
        let req = Request::write(&[0x01, 0x91, 0x00], &[0xC4, 0x00], 1, &[0; 4], "t");
        assert!(req.complete(Err(EipError::Timeout)));
        assert!(!req.complete(Ok(Completion::default())));
        assert_eq!(req.status(), Status::Err(EipError::Timeout));
        assert!(req.take_completion().is_none());
    }

    #[test]
    fn test_abort_latches_and_discards_late_reply() {
        let req = Request::read(&[0x01, 0x91, 0x00], 1, "t");
        req.abort();
        assert!(req.is_aborted());
        assert_eq!(req.status(), Status::Err(EipError::Abort));
        assert!(!req.complete(Ok(Completion::default())));
        assert!(req.take_completion().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Request::read(&[0], 1, "a");
        let b = Request::read(&[0], 1, "b");
        assert_ne!(a.id(), b.id());
    }
}
