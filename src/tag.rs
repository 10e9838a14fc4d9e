// tag.rs - Tag engine
// =========================================================================
//
// A tag is a handle on one named data item in a controller. Its state
// machine runs on the non-blocking worker pool, one transition per tick,
// always under the tag's own lock:
//
//   Starting → GetSession → WaitSession ─ok─▶ Running ⇄ Busy
//                   ▲            │failed        │
//                   │            ▼              ▼ fatal error / retries spent
//          WaitRetrySession ◀ StartRetrySession ─────────▶ Terminating
//
// Callers never block here: read/write/abort only set flags that the next
// tick acts on, and status() reports Pending until the operation resolves.
// =========================================================================

use crate::attributes::TagAttributes;
use crate::buffer::{ByteBuffer, SharedBuffer};
use crate::endpoint::Endpoint;
use crate::error::{EipError, Result, Status};
use crate::job::{JobClass, JobHandle, JobStatus, Scheduler};
use crate::request::{Request, RequestKind};
use crate::resource::{ResourceRegistry, Shared};
use crate::session::{Session, SessionManager};
use crate::tag_path::TagPath;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPhase {
    Starting,
    GetSession,
    WaitSession,
    StartRetrySession,
    WaitRetrySession,
    Running,
    Busy,
    Terminating,
}

struct TagState {
    phase: TagPhase,
    status: Status,
    session: Option<Shared<Session>>,
    backoff: Vec<Duration>,
    retry_attempts: usize,
    retry_deadline: Option<Instant>,
    last_error: Option<EipError>,
    request: Option<Shared<Request>>,
    data: Option<SharedBuffer>,
    type_info: Option<Vec<u8>>,
    read_requested: bool,
    write_requested: bool,
    abort_requested: bool,
}

impl TagState {
    fn transition(&mut self, tag: &str, next: TagPhase) {
        tracing::debug!(tag, from = ?self.phase, to = ?next, "tag state change");
        self.phase = next;
    }

    fn operation_pending(&self) -> bool {
        self.read_requested || self.write_requested || self.request.is_some()
    }

    /// Latched error of a terminated tag
    fn check_usable(&self) -> Result<()> {
        if self.phase == TagPhase::Terminating {
            return Err(match &self.status {
                Status::Err(e) => e.clone(),
                _ => EipError::Abort,
            });
        }
        Ok(())
    }
}

pub struct Tag {
    name: String,
    attrs: TagAttributes,
    endpoint: Endpoint,
    encoded_name: Vec<u8>,
    elem_count: u16,
    registry: Arc<ResourceRegistry>,
    sessions: Arc<SessionManager>,
    state: Mutex<TagState>,
}

impl Tag {
    /// Validates the attributes and allocates the tag. Nothing touches the
    /// network until the tag's job is started with [`Tag::start`].
    pub fn create(
        registry: &Arc<ResourceRegistry>,
        sessions: &Arc<SessionManager>,
        attrs: TagAttributes,
        backoff: Vec<Duration>,
    ) -> Result<Shared<Tag>> {
        let endpoint = Endpoint::parse(&attrs.endpoint)?;
        let encoded_name = TagPath::parse(&attrs.name)?.to_bytes()?;
        let elem_count = u16::try_from(attrs.elem_count).map_err(|_| {
            EipError::BadParam(format!("elem_count {} exceeds 65535", attrs.elem_count))
        })?;

        let data = match attrs.data_size() {
            Some(size) => Some(registry.make(Mutex::new(ByteBuffer::zeroed(size)))?),
            None => None,
        };
        let type_info = attrs.elem_type.map(|t| t.type_header().to_vec());

        let tag = Tag {
            name: attrs.name.clone(),
            endpoint,
            encoded_name,
            elem_count,
            registry: Arc::clone(registry),
            sessions: Arc::clone(sessions),
            state: Mutex::new(TagState {
                phase: TagPhase::Starting,
                status: Status::Pending,
                session: None,
                backoff,
                retry_attempts: 0,
                retry_deadline: None,
                last_error: None,
                request: None,
                data,
                type_info,
                read_requested: false,
                write_requested: false,
                abort_requested: false,
            }),
            attrs,
        };
        tracing::debug!(tag = %tag.name, endpoint = %tag.endpoint, "tag created");
        registry.make_with_cleanup(tag, Tag::teardown)
    }

    /// Submits the tag's state machine to the scheduler. The job holds a
    /// weak reference and ends on its own once the tag is dropped.
    pub fn start(tag: &Shared<Tag>, scheduler: &Scheduler) -> Result<JobHandle> {
        let weak = tag.downgrade();
        scheduler.submit(format!("tag {}", tag.name), JobClass::NonBlocking, move || {
            match weak.upgrade() {
                Some(tag) => tag.tick(),
                None => JobStatus::Done,
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &TagAttributes {
        &self.attrs
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn elem_count(&self) -> usize {
        self.elem_count as usize
    }

    pub fn status(&self) -> Status {
        self.state.lock().status.clone()
    }

    pub fn phase(&self) -> TagPhase {
        self.state.lock().phase
    }

    pub fn retry_attempts(&self) -> usize {
        self.state.lock().retry_attempts
    }

    /// Current data size in bytes (0 before the first read of an untyped tag)
    pub fn size(&self) -> usize {
        self.state
            .lock()
            .data
            .as_ref()
            .map(|data| data.lock().len())
            .unwrap_or(0)
    }

    /// Bytes per element, once known from the declared type or a read
    pub fn elem_size(&self) -> Option<usize> {
        let size = self.size();
        if size > 0 {
            Some(size / self.elem_count.max(1) as usize)
        } else {
            self.attrs.element_size()
        }
    }

    /// Type descriptor a write will carry
    pub fn type_info(&self) -> Option<Vec<u8>> {
        self.state.lock().type_info.clone()
    }

    /// Requests a read; the next tick in `Running` issues it
    pub fn start_read(&self) -> Result<()> {
        let mut st = self.state.lock();
        st.check_usable()?;
        if st.operation_pending() {
            return Err(EipError::Busy);
        }
        st.read_requested = true;
        st.status = Status::Pending;
        Ok(())
    }

    /// Requests a write of the current data buffer
    pub fn start_write(&self) -> Result<()> {
        let mut st = self.state.lock();
        st.check_usable()?;
        if st.operation_pending() {
            return Err(EipError::Busy);
        }
        if st.type_info.is_none() {
            return Err(EipError::NotAllowed(format!(
                "type of tag {} is unknown; read it first or set elem_type",
                self.name
            )));
        }
        if st.data.is_none() {
            return Err(EipError::NoData(format!("tag {} has no data to write", self.name)));
        }
        st.write_requested = true;
        st.status = Status::Pending;
        Ok(())
    }

    /// Cancels the pending operation, if any. Takes effect on the next tick.
    pub fn abort(&self) {
        let mut st = self.state.lock();
        if st.operation_pending() {
            st.abort_requested = true;
        }
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&ByteBuffer) -> Result<R>) -> Result<R> {
        let st = self.state.lock();
        let data = st
            .data
            .as_ref()
            .ok_or_else(|| EipError::NoData(format!("tag {} has no data", self.name)))?;
        let buf = data.lock();
        f(&buf)
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut ByteBuffer) -> Result<R>) -> Result<R> {
        let st = self.state.lock();
        let data = st
            .data
            .as_ref()
            .ok_or_else(|| EipError::NoData(format!("tag {} has no data", self.name)))?;
        let mut buf = data.lock();
        f(&mut buf)
    }

    /// One state machine transition
    pub fn tick(&self) -> JobStatus {
        let mut st = self.state.lock();
        self.step(&mut st)
    }

    fn step(&self, st: &mut TagState) -> JobStatus {
        match st.phase {
            TagPhase::Starting => st.transition(&self.name, TagPhase::GetSession),

            TagPhase::GetSession => match self.sessions.open(&self.endpoint) {
                Ok(session) => {
                    st.session = Some(session);
                    st.transition(&self.name, TagPhase::WaitSession);
                }
                Err(e) => {
                    tracing::warn!(tag = %self.name, endpoint = %self.endpoint, error = %e, "no session available");
                    st.status = Status::Err(EipError::Open(format!(
                        "cannot get session for {}: {}",
                        self.endpoint, e
                    )));
                    st.transition(&self.name, TagPhase::Terminating);
                }
            },

            TagPhase::WaitSession => match session_status(st) {
                Status::Pending => {}
                Status::Ok => {
                    st.retry_attempts = 0;
                    st.last_error = None;
                    if !st.operation_pending() && st.status.is_pending() {
                        st.status = Status::Ok;
                    }
                    st.transition(&self.name, TagPhase::Running);
                }
                Status::Err(e) => self.drop_session(st, e),
            },

            TagPhase::StartRetrySession => {
                if st.retry_attempts < st.backoff.len() {
                    let delay = st.backoff[st.retry_attempts];
                    st.retry_attempts += 1;
                    st.retry_deadline = Some(Instant::now() + delay);
                    tracing::warn!(
                        tag = %self.name,
                        endpoint = %self.endpoint,
                        attempt = st.retry_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retrying session"
                    );
                    st.transition(&self.name, TagPhase::WaitRetrySession);
                } else {
                    let reason = st
                        .last_error
                        .take()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown error".to_string());
                    tracing::error!(tag = %self.name, endpoint = %self.endpoint, retries = st.retry_attempts, "giving up on session");
                    st.status = Status::Err(EipError::Open(format!(
                        "unable to open session to {} after {} retries: {}",
                        self.endpoint, st.retry_attempts, reason
                    )));
                    st.transition(&self.name, TagPhase::Terminating);
                }
            }

            TagPhase::WaitRetrySession => {
                if st.retry_deadline.map_or(true, |at| Instant::now() >= at) {
                    st.retry_deadline = None;
                    st.transition(&self.name, TagPhase::GetSession);
                }
            }

            TagPhase::Running => {
                if let Status::Err(e) = session_status(st) {
                    self.drop_session(st, e);
                } else if st.abort_requested {
                    st.abort_requested = false;
                    if st.read_requested || st.write_requested {
                        st.read_requested = false;
                        st.write_requested = false;
                        st.status = Status::Err(EipError::Abort);
                    }
                } else if st.read_requested {
                    st.read_requested = false;
                    self.issue(st, RequestKind::Read);
                } else if st.write_requested {
                    st.write_requested = false;
                    self.issue(st, RequestKind::Write);
                }
            }

            TagPhase::Busy => self.poll_request(st),

            TagPhase::Terminating => {
                if let Some(request) = st.request.take() {
                    request.abort();
                }
                st.session = None;
                st.data = None;
                st.backoff = Vec::new();
                st.read_requested = false;
                st.write_requested = false;
                st.abort_requested = false;
                tracing::debug!(tag = %self.name, status = %st.status, "tag terminated");
                return JobStatus::Done;
            }
        }
        JobStatus::Reschedule
    }

    fn drop_session(&self, st: &mut TagState, error: EipError) {
        tracing::debug!(tag = %self.name, error = %error, "session lost");
        st.session = None;
        st.last_error = Some(error);
        st.transition(&self.name, TagPhase::StartRetrySession);
    }

    fn issue(&self, st: &mut TagState, kind: RequestKind) {
        let request = match kind {
            RequestKind::Read => Request::read(&self.encoded_name, self.elem_count, self.name.clone()),
            _ => match self.write_request(st) {
                Ok(request) => request,
                Err(e) => {
                    st.status = Status::Err(e);
                    return;
                }
            },
        };

        let queued = self
            .registry
            .make(request)
            .and_then(|request| match st.session.as_ref() {
                Some(session) => session.queue_request(request.clone()).map(|_| request),
                None => Err(EipError::BadConnection("no session".to_string())),
            });

        match queued {
            Ok(request) => {
                tracing::trace!(tag = %self.name, request = request.id(), ?kind, "request started");
                st.request = Some(request);
                st.transition(&self.name, TagPhase::Busy);
            }
            Err(e) => {
                tracing::debug!(tag = %self.name, error = %e, "cannot queue request");
                st.status = Status::Err(e);
            }
        }
    }

    fn write_request(&self, st: &TagState) -> Result<Request> {
        let type_info = st.type_info.as_ref().ok_or_else(|| {
            EipError::NotAllowed(format!("type of tag {} is unknown", self.name))
        })?;
        let data = st
            .data
            .as_ref()
            .ok_or_else(|| EipError::NoData(format!("tag {} has no data to write", self.name)))?;
        let data = data.lock();
        Ok(Request::write(
            &self.encoded_name,
            type_info,
            self.elem_count,
            data.as_slice(),
            self.name.clone(),
        ))
    }

    fn poll_request(&self, st: &mut TagState) {
        if st.abort_requested {
            st.abort_requested = false;
            if let Some(request) = st.request.take() {
                request.abort();
            }
            st.status = Status::Err(EipError::Abort);
            st.transition(&self.name, TagPhase::Running);
            return;
        }

        let Some(request) = st.request.clone() else {
            st.transition(&self.name, TagPhase::Running);
            return;
        };

        match request.status() {
            Status::Pending => {}
            Status::Ok => {
                st.request = None;
                if let Some(completion) = request.take_completion() {
                    if let Some(response) = completion.response {
                        // the previous buffer is released here
                        st.data = Some(response);
                    }
                    if !completion.type_info.is_empty() {
                        st.type_info = Some(completion.type_info);
                    }
                }
                st.status = Status::Ok;
                st.transition(&self.name, TagPhase::Running);
            }
            Status::Err(e) => {
                st.request = None;
                let fatal = e.is_fatal();
                tracing::debug!(tag = %self.name, error = %e, fatal, "operation failed");
                st.status = Status::Err(e);
                let next = if fatal {
                    TagPhase::Terminating
                } else {
                    TagPhase::Running
                };
                st.transition(&self.name, next);
            }
        }
    }

    fn teardown(&mut self) {
        let st = self.state.get_mut();
        if let Some(request) = st.request.take() {
            request.abort();
        }
        tracing::debug!(tag = %self.name, "tag destroyed");
    }
}

fn session_status(st: &TagState) -> Status {
    match &st.session {
        Some(session) => session.status(),
        None => Status::Err(EipError::BadConnection("no session".to_string())),
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Tag")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("phase", &st.phase)
            .field("status", &st.status)
            .finish()
    }
}
