// session.rs - EtherNet/IP session per endpoint
// =========================================================================
//
// One session owns one TCP connection to a gateway and the EtherNet/IP
// session registered on it. Tags that resolve to the same endpoint share
// the session through the SessionManager's named cache.
//
//   Starting ──connect──▶ OpenSession ──register──▶ Running
//
// Any failure on the way (or a broken connection while Running) latches an
// error status, fails every queued request and ends the session's job.
// Reconnecting is the tag's business: it drops the failed session and asks
// the manager for a fresh one.
//
// The state machine is driven by a job on the blocking worker pool. The
// job holds only a weak reference, so a session with no remaining users
// is destroyed; the driver then unregisters and closes the socket.
// =========================================================================

use crate::buffer::ByteBuffer;
use crate::cache::ResourceCache;
use crate::cip;
use crate::config::ConnectionConfig;
use crate::eip::{self, EipHeader, FrameReader};
use crate::endpoint::Endpoint;
use crate::error::{EipError, Result, Status};
use crate::job::{JobClass, JobStatus, Scheduler};
use crate::request::{Completion, Request, RequestKind};
use crate::resource::{ResourceRegistry, Shared, WeakShared};
use crate::transport::{Connector, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Read timeout used while waiting for the Register Session reply
const REGISTER_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Starting,
    OpenSession,
    Running,
}

struct SessionState {
    phase: SessionPhase,
    status: Status,
    session_handle: u32,
    queue: VecDeque<Shared<Request>>,
}

pub struct Session {
    key: String,
    endpoint: Endpoint,
    registry: Arc<ResourceRegistry>,
    cache: Arc<ResourceCache<Session>>,
    started: AtomicBool,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    /// `Pending` while connecting, `Ok` once registered, the latched error
    /// after a failure
    pub fn status(&self) -> Status {
        self.state.lock().status.clone()
    }

    pub fn session_handle(&self) -> Option<u32> {
        let state = self.state.lock();
        (state.phase == SessionPhase::Running).then_some(state.session_handle)
    }

    /// Queues a request behind any already waiting. Fails with the session's
    /// error once it has failed.
    pub fn queue_request(&self, request: Shared<Request>) -> Result<()> {
        let mut state = self.state.lock();
        if let Status::Err(e) = &state.status {
            return Err(e.clone());
        }
        tracing::trace!(session = %self.key, request = request.id(), label = request.label(), "request queued");
        state.queue.push_back(request);
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.state.lock().phase = phase;
    }

    fn mark_running(&self, session_handle: u32) {
        let mut state = self.state.lock();
        state.phase = SessionPhase::Running;
        state.session_handle = session_handle;
        state.status = Status::Ok;
    }

    fn pop_request(&self) -> Option<Shared<Request>> {
        self.state.lock().queue.pop_front()
    }

    fn fail(&self, error: EipError) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.status = Status::Err(error.clone());
            state.queue.drain(..).collect()
        };
        for request in drained {
            request.complete(Err(error.clone()));
        }
    }

    fn teardown(&mut self) {
        let state = self.state.get_mut();
        for request in state.queue.drain(..) {
            request.complete(Err(EipError::BadConnection("session destroyed".to_string())));
        }
        tracing::debug!(session = %self.key, "session destroyed");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("phase", &state.phase)
            .field("status", &state.status)
            .field("queued", &state.queue.len())
            .finish()
    }
}

struct InFlight {
    request: Shared<Request>,
    packet: Vec<u8>,
    written: usize,
    context: u64,
    sent_at: Option<Instant>,
}

/// Owns the socket; lives inside the session's job
struct SessionDriver {
    session: WeakShared<Session>,
    key: String,
    endpoint: Endpoint,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    reader: FrameReader,
    in_flight: Option<InFlight>,
    session_handle: u32,
    next_context: u64,
}

impl SessionDriver {
    fn step(&mut self) -> JobStatus {
        let Some(session) = self.session.upgrade() else {
            self.close();
            return JobStatus::Done;
        };

        let result = match session.phase() {
            SessionPhase::Starting => self.connect(&session),
            SessionPhase::OpenSession => self.register(&session),
            SessionPhase::Running => self.service(&session),
        };

        match result {
            Ok(()) => JobStatus::Reschedule,
            Err(e) => {
                self.fail(&session, e);
                JobStatus::Done
            }
        }
    }

    fn next_context(&mut self) -> u64 {
        self.next_context = self.next_context.wrapping_add(1).max(1);
        self.next_context
    }

    fn connect(&mut self, session: &Session) -> Result<()> {
        tracing::debug!(session = %self.key, "connecting");
        let transport = self.connector.connect(&self.endpoint, &self.config)?;
        self.transport = Some(transport);
        session.set_phase(SessionPhase::OpenSession);
        Ok(())
    }

    fn register(&mut self, session: &Session) -> Result<()> {
        let handle = self.register_session().map_err(|e| match e {
            EipError::EipStatus(_) => e,
            other => EipError::Open(format!("register session with {} failed: {}", self.key, other)),
        })?;

        self.session_handle = handle;
        session.mark_running(handle);
        tracing::info!(session = %self.key, session_handle = handle, "session registered");
        Ok(())
    }

    fn register_session(&mut self) -> Result<u32> {
        let context = self.next_context();
        let frame = eip::build_register_session(context)?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| EipError::BadConnection("no transport".to_string()))?;

        transport.set_nonblocking(false)?;
        transport.set_read_timeout(Some(REGISTER_POLL))?;
        transport.write_all(&frame)?;
        tracing::trace!(session = %self.key, bytes = ?frame, "register session sent");

        let deadline = Instant::now() + self.config.reply_timeout();
        let reply = loop {
            if let Some(reply) = self.reader.poll(transport.as_mut())? {
                break reply;
            }
            if Instant::now() >= deadline {
                return Err(EipError::Timeout);
            }
        };

        let handle = eip::unmarshal_register_session_reply(&reply)?;
        transport.set_read_timeout(None)?;
        transport.set_nonblocking(true)?;
        Ok(handle)
    }

    fn service(&mut self, session: &Session) -> Result<()> {
        if self.in_flight.is_none() {
            self.start_next(session);
        }
        self.flush()?;
        self.receive(session)?;

        if let Some(sent_at) = self.in_flight.as_ref().and_then(|f| f.sent_at) {
            if sent_at.elapsed() > self.config.reply_timeout() {
                return Err(EipError::Timeout);
            }
        }
        Ok(())
    }

    fn start_next(&mut self, session: &Session) {
        while let Some(request) = session.pop_request() {
            if request.is_aborted() {
                tracing::trace!(session = %self.key, request = request.id(), "dropping aborted request");
                continue;
            }
            let context = self.next_context();
            match self.build_packet(&request, context) {
                Ok(packet) => {
                    self.in_flight = Some(InFlight {
                        request,
                        packet,
                        written: 0,
                        context,
                        sent_at: None,
                    });
                    return;
                }
                Err(e) => {
                    tracing::debug!(session = %self.key, request = request.id(), error = %e, "cannot marshal request");
                    request.complete(Err(e));
                }
            }
        }
    }

    /// SendRRData frame: EIP header, CPF, optional Unconnected Send, request
    fn build_packet(&self, request: &Request, context: u64) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::from_vec(request.payload().to_vec());
        if !self.endpoint.path.is_empty() {
            cip::marshal_cip_cm_unconnected(
                &mut buf,
                &self.endpoint.path,
                self.config.secs_per_tick,
                self.config.timeout_ticks,
            )?;
        }
        eip::marshal_cip_cfp_unconnected(&mut buf, self.config.router_timeout_secs)?;
        eip::marshal_eip_header(&mut buf, eip::CMD_SEND_RR_DATA, self.session_handle, context)?;
        Ok(buf.into_vec())
    }

    fn flush(&mut self) -> Result<()> {
        let (Some(transport), Some(flight)) = (self.transport.as_mut(), self.in_flight.as_mut()) else {
            return Ok(());
        };

        while flight.written < flight.packet.len() {
            match transport.write(&flight.packet[flight.written..]) {
                Ok(0) => {
                    return Err(EipError::BadConnection(
                        "connection closed while sending".to_string(),
                    ))
                }
                Ok(n) => flight.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if flight.sent_at.is_none() {
            flight.sent_at = Some(Instant::now());
            tracing::trace!(
                session = %self.key,
                request = flight.request.id(),
                context = flight.context,
                bytes = ?flight.packet,
                "request sent"
            );
        }
        Ok(())
    }

    fn receive(&mut self, session: &Session) -> Result<()> {
        loop {
            let frame = match self.transport.as_mut() {
                Some(transport) => self.reader.poll(transport.as_mut())?,
                None => return Err(EipError::BadConnection("no transport".to_string())),
            };
            match frame {
                Some(frame) => self.dispatch(session, &frame),
                None => return Ok(()),
            }
        }
    }

    fn dispatch(&mut self, session: &Session, frame: &[u8]) {
        let header = match EipHeader::parse(frame) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(session = %self.key, error = %e, "unparseable frame");
                return;
            }
        };
        tracing::trace!(session = %self.key, context = header.sender_context, bytes = ?frame, "frame received");

        let matches = self
            .in_flight
            .as_ref()
            .map(|f| f.context == header.sender_context)
            .unwrap_or(false);
        if !matches {
            tracing::warn!(
                session = %self.key,
                command = header.command,
                context = header.sender_context,
                "discarding reply that matches no request"
            );
            return;
        }
        let Some(flight) = self.in_flight.take() else {
            return;
        };

        let request = flight.request;
        if request.is_aborted() {
            tracing::trace!(session = %self.key, request = request.id(), "discarding reply to aborted request");
            return;
        }

        let result = decode_reply(&session.registry, &request, &header, frame);
        if let Err(e) = &result {
            tracing::debug!(session = %self.key, request = request.id(), error = %e, "request failed");
        }
        request.complete(result);
    }

    fn fail(&mut self, session: &Shared<Session>, error: EipError) {
        tracing::warn!(session = %self.key, error = %error, "session failed");
        if let Some(flight) = self.in_flight.take() {
            flight.request.complete(Err(error.clone()));
        }
        session.cache.evict(&session.key, session);
        session.fail(error);
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    /// Best-effort Unregister Session, then close
    fn close(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            flight
                .request
                .complete(Err(EipError::BadConnection("session closed".to_string())));
        }
        if let Some(mut transport) = self.transport.take() {
            if self.session_handle != 0 {
                let context = self.next_context();
                if let Ok(frame) = eip::build_unregister_session(self.session_handle, context) {
                    let _ = transport.set_nonblocking(false);
                    let _ = transport.write_all(&frame);
                }
                tracing::debug!(session = %self.key, session_handle = self.session_handle, "session unregistered");
            }
            transport.close();
        }
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        self.close();
    }
}

fn decode_reply(
    registry: &Arc<ResourceRegistry>,
    request: &Request,
    header: &EipHeader,
    frame: &[u8],
) -> Result<Completion> {
    if header.status != 0 {
        return Err(EipError::EipStatus(header.status));
    }
    if header.command != eip::CMD_SEND_RR_DATA {
        return Err(EipError::BadReply(format!(
            "expected SendRRData reply, got command 0x{:04X}",
            header.command
        )));
    }

    let cip_bytes = eip::unmarshal_cip_cfp_unconnected(&frame[eip::EIP_HEADER_SIZE..])?;
    let reply = cip::unmarshal_cip_reply(cip_bytes, request.service())?;

    match request.kind() {
        RequestKind::Read => {
            let read = cip::unmarshal_cip_read(reply.data)?;
            let response = registry.make(Mutex::new(ByteBuffer::from_vec(read.data.to_vec())))?;
            Ok(Completion {
                response: Some(response),
                type_info: read.type_info.to_vec(),
            })
        }
        RequestKind::Write => Ok(Completion::default()),
        RequestKind::GetAttributes => {
            let response = registry.make(Mutex::new(ByteBuffer::from_vec(reply.data.to_vec())))?;
            Ok(Completion {
                response: Some(response),
                type_info: Vec::new(),
            })
        }
    }
}

/// Hands out shared sessions keyed by endpoint
pub struct SessionManager {
    registry: Arc<ResourceRegistry>,
    scheduler: Arc<Scheduler>,
    cache: Arc<ResourceCache<Session>>,
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        scheduler: Arc<Scheduler>,
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            registry,
            scheduler,
            cache: Arc::new(ResourceCache::new("sessions")),
            connector,
            config,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn session_key(&self, endpoint: &Endpoint) -> String {
        format!("session{}", endpoint.canonical(self.config.default_port))
    }

    /// Parses `endpoint` and returns the shared session for it
    pub fn get_or_open(&self, endpoint: &str) -> Result<Shared<Session>> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.open(&endpoint)
    }

    pub fn open(&self, endpoint: &Endpoint) -> Result<Shared<Session>> {
        let key = self.session_key(endpoint);
        let session = self
            .cache
            .get_or_create(&key, || self.create(&key, endpoint))?;
        self.start(&session)?;
        Ok(session)
    }

    /// Number of live cached sessions
    pub fn live_sessions(&self) -> usize {
        self.cache.live_len()
    }

    fn create(&self, key: &str, endpoint: &Endpoint) -> Result<Shared<Session>> {
        let session = Session {
            key: key.to_string(),
            endpoint: endpoint.clone(),
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            started: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                phase: SessionPhase::Starting,
                status: Status::Pending,
                session_handle: 0,
                queue: VecDeque::new(),
            }),
        };
        tracing::debug!(session = key, "session created");
        self.registry.make_with_cleanup(session, Session::teardown)
    }

    fn start(&self, session: &Shared<Session>) -> Result<()> {
        if session.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut driver = SessionDriver {
            session: session.downgrade(),
            key: session.key.clone(),
            endpoint: session.endpoint.clone(),
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            transport: None,
            reader: FrameReader::new(),
            in_flight: None,
            session_handle: 0,
            next_context: 0,
        };

        let submitted = self.scheduler.submit(
            format!("session {}", session.key),
            JobClass::Blocking,
            move || driver.step(),
        );
        if let Err(e) = submitted {
            self.cache.evict(&session.key, session);
            session.fail(e.clone());
            return Err(e);
        }
        Ok(())
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use std::io::Read;
    use std::sync::atomic::AtomicUsize;

    /// Releases one canned reply per frame written, records every write
    struct Scripted {
        replies: VecDeque<Vec<u8>>,
        incoming: VecDeque<u8>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.incoming.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "empty"));
            }
            let n = out.len().min(self.incoming.len());
            for (slot, byte) in out.iter_mut().zip(self.incoming.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.written.lock().extend_from_slice(bytes);
            if let Some(reply) = self.replies.pop_front() {
                self.incoming.extend(reply);
            }
            Ok(bytes.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Scripted {
        fn set_nonblocking(&mut self, _: bool) -> io::Result<()> {
            Ok(())
        }

        fn set_read_timeout(&mut self, _: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn peer(&self) -> String {
            "scripted".to_string()
        }
    }

    struct ScriptedConnector {
        script: Mutex<Option<Vec<Vec<u8>>>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Connector for ScriptedConnector {
        fn connect(&self, _: &Endpoint, _: &ConnectionConfig) -> Result<Box<dyn Transport>> {
            let script = self
                .script
                .lock()
                .take()
                .ok_or_else(|| EipError::Open("script used".to_string()))?;
            Ok(Box::new(Scripted {
                replies: script.into(),
                incoming: VecDeque::new(),
                written: Arc::clone(&self.written),
            }))
        }
    }

    struct Refusing(AtomicUsize);

    impl Connector for Refusing {
        fn connect(&self, _: &Endpoint, _: &ConnectionConfig) -> Result<Box<dyn Transport>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(EipError::Open("connection refused".to_string()))
        }
    }

    fn register_reply(handle: u32, status: u32) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        eip::marshal_register_session(&mut buf);
        eip::marshal_eip_header(&mut buf, eip::CMD_REGISTER_SESSION, handle, 1).unwrap();
        let mut bytes = buf.into_vec();
        bytes[8..12].copy_from_slice(&status.to_le_bytes());
        bytes
    }

    fn rr_reply(handle: u32, context: u64, cip_reply: &[u8]) -> Vec<u8> {
        let mut buf = ByteBuffer::from_vec(cip_reply.to_vec());
        eip::marshal_cip_cfp_unconnected(&mut buf, 0).unwrap();
        eip::marshal_eip_header(&mut buf, eip::CMD_SEND_RR_DATA, handle, context).unwrap();
        buf.into_vec()
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn manager(connector: Arc<dyn Connector>) -> (Arc<ResourceRegistry>, SessionManager) {
        manager_with(connector, ConnectionConfig::default())
    }

    fn manager_with(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
    ) -> (Arc<ResourceRegistry>, SessionManager) {
        let registry = ResourceRegistry::new("session-test");
        let scheduler = Scheduler::new(&SchedulerConfig::default()).unwrap();
        let manager = SessionManager::new(Arc::clone(&registry), scheduler, connector, config);
        (registry, manager)
    }

    fn scripted(replies: Vec<Vec<u8>>) -> (Arc<ScriptedConnector>, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let connector = Arc::new(ScriptedConnector {
            script: Mutex::new(Some(replies)),
            written: Arc::clone(&written),
        });
        (connector, written)
    }

    #[test]
    fn test_register_then_read() {
        let (connector, written) = scripted(vec![
            register_reply(0x42, 0),
            rr_reply(
                0x42,
                2,
                &[0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00],
            ),
        ]);
        let (registry, manager) = manager(connector);

        let session = manager.get_or_open("10.0.0.1,1,0").unwrap();
        let request = registry
            .make(Request::read(&[0x01, 0x91, 0x00], 1, "test"))
            .unwrap();
        session.queue_request(request.clone()).unwrap();

        wait_until(|| request.is_done());
        assert_eq!(request.status(), Status::Ok);
        assert_eq!(session.session_handle(), Some(0x42));

        let completion = request.take_completion().unwrap();
        assert_eq!(completion.type_info, vec![0xC4, 0x00]);
        let data = completion.response.unwrap();
        assert_eq!(data.lock().get_i32(0).unwrap(), 42);

        let written = written.lock();
        // second frame: SendRRData carrying an Unconnected Send
        assert_eq!(&written[28..30], &[0x6F, 0x00]);
        assert_eq!(written[28 + 4], 0x42);
        assert_eq!(written[28 + 24 + 16], cip::SERVICE_UNCONNECTED_SEND);
    }

    #[test]
    fn test_reply_with_foreign_context_is_discarded() {
        // a stale error reply arrives ahead of the real one
        let mut replies = rr_reply(0x42, 99, &[0xCC, 0x00, 0x04, 0x00]);
        replies.extend(rr_reply(
            0x42,
            2,
            &[0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 0x07, 0x00, 0x00, 0x00],
        ));
        let (connector, _written) = scripted(vec![register_reply(0x42, 0), replies]);
        let (registry, manager) = manager(connector);

        let session = manager.get_or_open("10.0.0.4,1,0").unwrap();
        let request = registry
            .make(Request::read(&[0x01, 0x91, 0x00], 1, "test"))
            .unwrap();
        session.queue_request(request.clone()).unwrap();

        wait_until(|| request.is_done());
        assert_eq!(request.status(), Status::Ok);
        let data = request.take_completion().unwrap().response.unwrap();
        assert_eq!(data.lock().get_i32(0).unwrap(), 7);
        assert!(session.status().is_ok());
    }

    #[test]
    fn test_register_status_error_is_terminal() {
        let (connector, _written) = scripted(vec![register_reply(1, 0x69)]);
        let (_registry, manager) = manager(connector);

        let session = manager.get_or_open("10.0.0.2").unwrap();
        wait_until(|| !session.status().is_pending());
        assert_eq!(session.status(), Status::Err(EipError::EipStatus(0x69)));
        assert_eq!(session.phase(), SessionPhase::OpenSession);
    }

    #[test]
    fn test_failed_session_is_evicted_and_rejects_requests() {
        let refusing = Arc::new(Refusing(AtomicUsize::new(0)));
        let (registry, manager) = manager(refusing.clone());

        let first = manager.get_or_open("10.0.0.3,1,0").unwrap();
        wait_until(|| !first.status().is_pending());
        assert!(matches!(first.status(), Status::Err(EipError::Open(_))));

        let request = registry.make(Request::read(&[0x01, 0x91, 0x00], 1, "t")).unwrap();
        assert!(matches!(
            first.queue_request(request),
            Err(EipError::Open(_))
        ));

        let second = manager.get_or_open("10.0.0.3:44818, 1, 0").unwrap();
        assert!(!Shared::ptr_eq(&first, &second));
        wait_until(|| refusing.0.load(Ordering::SeqCst) == 2);
    }

    #[test]
    fn test_same_endpoint_shares_session() {
        // no register reply: the session stays pending until the reply timeout
        let (connector, _written) = scripted(Vec::new());
        let config = ConnectionConfig {
            reply_timeout_ms: 300,
            ..ConnectionConfig::default()
        };
        let (_registry, manager) = manager_with(connector, config);

        let a = manager.get_or_open("plc,1,0").unwrap();
        let b = manager.get_or_open("plc:44818,1,0").unwrap();
        assert!(Shared::ptr_eq(&a, &b));
        assert_eq!(manager.live_sessions(), 1);
        assert_eq!(manager.session_key(a.endpoint()), "sessionplc:44818,1,0");

        wait_until(|| !a.status().is_pending());
        assert!(matches!(a.status(), Status::Err(EipError::Open(_))));
    }

    #[test]
    fn test_bad_endpoint_fails_fast() {
        let refusing = Arc::new(Refusing(AtomicUsize::new(0)));
        let (_registry, manager) = manager(refusing.clone());
        assert!(matches!(
            manager.get_or_open("10.0.0.1,1,"),
            Err(EipError::Format(_))
        ));
        assert_eq!(refusing.0.load(Ordering::SeqCst), 0);
    }
}
