// client.rs - Public facade
// =========================================================================
//
// EipClient ties the pieces together: one resource registry, one scheduler,
// one session manager and the table of integer tag handles. All calls are
// non-blocking unless given a timeout, in which case they poll the tag's
// status every `poll_interval_ms` until it resolves or the time runs out.
// =========================================================================

use crate::attributes::TagAttributes;
use crate::cip::{self, ControllerIdentity};
use crate::config::ClientConfig;
use crate::error::{EipError, Result, Status};
use crate::job::Scheduler;
use crate::request::Request;
use crate::resource::{ResourceRegistry, Shared};
use crate::session::SessionManager;
use crate::tag::Tag;
use crate::tag_manager::{TagEntry, TagManager};
use crate::transport::{Connector, TcpConnector};
use crate::version::VERSION;
use lazy_static::lazy_static;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

lazy_static! {
    static ref GLOBAL_CLIENT: Result<EipClient> = EipClient::new(ClientConfig::default());
}

macro_rules! tag_accessors {
    ($($ty:ty => $get:ident, $set:ident;)*) => {
        $(
            /// Reads a value from the tag's data buffer at a byte offset
            pub fn $get(&self, id: i32, offset: usize) -> Result<$ty> {
                let entry = self.tags.get(id)?;
                entry.locked(|tag| tag.with_data(|buf| buf.$get(offset)))
            }

            /// Writes a value into the tag's data buffer at a byte offset.
            /// Call [`EipClient::write`] to send it to the controller.
            pub fn $set(&self, id: i32, offset: usize, value: $ty) -> Result<()> {
                let entry = self.tags.get(id)?;
                entry.locked(|tag| tag.with_data_mut(|buf| buf.$set(offset, value)))
            }
        )*
    };
}

/// Client for Allen-Bradley controllers over EtherNet/IP
///
/// # Examples
///
/// ```no_run
/// use logix_eip::{ClientConfig, EipClient};
/// use std::time::Duration;
///
/// let client = EipClient::new(ClientConfig::default())?;
/// let id = client.create(
///     "protocol=ab_eip&gateway=192.168.1.10&path=1,0&name=Counts[0]&elem_count=4&elem_type=dint",
///     Duration::from_secs(5),
/// )?;
///
/// client.read(id, Duration::from_secs(1)).into_result()?;
/// let first = client.get_i32(id, 0)?;
///
/// client.set_i32(id, 0, first + 1)?;
/// client.write(id, Duration::from_secs(1)).into_result()?;
/// client.destroy(id);
/// # Ok::<(), logix_eip::EipError>(())
/// ```
pub struct EipClient {
    config: ClientConfig,
    registry: Arc<ResourceRegistry>,
    scheduler: Arc<Scheduler>,
    sessions: Arc<SessionManager>,
    tags: TagManager,
    closed: AtomicBool,
}

impl EipClient {
    /// Starts a client that reaches controllers over plain TCP
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Starts a client whose sessions open transports through `connector`
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let registry = ResourceRegistry::new("eip-client");
        let scheduler = Scheduler::new(&config.scheduler)?;
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            connector,
            config.connection.clone(),
        ));

        tracing::info!(version = VERSION, "EtherNet/IP client started");
        Ok(Self {
            config,
            registry,
            scheduler,
            sessions,
            tags: TagManager::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Process-wide client with default configuration, started on first use
    pub fn global() -> Result<&'static EipClient> {
        match &*GLOBAL_CLIENT {
            Ok(client) => Ok(client),
            Err(e) => Err(e.clone()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn version() -> &'static str {
        VERSION
    }

    /// Creates a tag from an attribute string and returns its handle.
    ///
    /// # Arguments
    ///
    /// * `attributes` - `key=value` pairs joined by `&`; `name` and one of
    ///   `gateway`/`path` are required
    /// * `timeout` - zero returns at once (poll [`EipClient::status`]);
    ///   otherwise waits until the session is up. On failure or timeout the
    ///   tag is destroyed and the error returned.
    pub fn create(&self, attributes: &str, timeout: Duration) -> Result<i32> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EipError::NotAllowed("client is shut down".to_string()));
        }

        let attrs = TagAttributes::parse(attributes)?;
        let tag = Tag::create(&self.registry, &self.sessions, attrs, self.config.retry.backoff())?;
        let job = Tag::start(&tag, &self.scheduler)?;
        let id = self.tags.insert(TagEntry::new(tag.clone(), job));
        tracing::debug!(id, tag = tag.name(), "tag handle created");

        if timeout.is_zero() {
            return Ok(id);
        }
        match self.wait(&tag, timeout) {
            Status::Err(e) => {
                self.destroy(id);
                Err(e)
            }
            _ => Ok(id),
        }
    }

    /// Starts a read. With a zero timeout returns `Pending` at once.
    pub fn read(&self, id: i32, timeout: Duration) -> Status {
        let entry = match self.tags.get(id) {
            Ok(entry) => entry,
            Err(e) => return Status::Err(e),
        };
        entry.locked(|tag| {
            if let Err(e) = tag.start_read() {
                return Status::Err(e);
            }
            self.settle(tag, timeout)
        })
    }

    /// Sends the tag's data buffer to the controller
    pub fn write(&self, id: i32, timeout: Duration) -> Status {
        let entry = match self.tags.get(id) {
            Ok(entry) => entry,
            Err(e) => return Status::Err(e),
        };
        entry.locked(|tag| {
            if let Err(e) = tag.start_write() {
                return Status::Err(e);
            }
            self.settle(tag, timeout)
        })
    }

    /// Cancels the tag's pending operation
    pub fn abort(&self, id: i32) -> Status {
        match self.tags.get(id) {
            Ok(entry) => entry.locked(|tag| {
                tag.abort();
                Status::Ok
            }),
            Err(e) => Status::Err(e),
        }
    }

    pub fn status(&self, id: i32) -> Status {
        match self.tags.get(id) {
            Ok(entry) => entry.locked(|tag| tag.status()),
            Err(e) => Status::Err(e),
        }
    }

    /// Removes the handle and releases the tag. Its job ends on the next
    /// scheduler pass.
    pub fn destroy(&self, id: i32) -> Status {
        match self.tags.remove(id) {
            Ok(entry) => {
                // wait out any caller still inside the API lock
                entry.locked(|tag| tag.abort());
                entry.job.cancel();
                tracing::debug!(id, tag = entry.tag.name(), "tag handle destroyed");
                Status::Ok
            }
            Err(e) => Status::Err(e),
        }
    }

    /// Data size in bytes
    pub fn size(&self, id: i32) -> Result<usize> {
        Ok(self.tags.get(id)?.locked(|tag| tag.size()))
    }

    pub fn elem_size(&self, id: i32) -> Result<Option<usize>> {
        Ok(self.tags.get(id)?.locked(|tag| tag.elem_size()))
    }

    pub fn elem_count(&self, id: i32) -> Result<usize> {
        Ok(self.tags.get(id)?.tag.elem_count())
    }

    tag_accessors! {
        u8 => get_u8, set_u8;
        i8 => get_i8, set_i8;
        u16 => get_u16, set_u16;
        i16 => get_i16, set_i16;
        u32 => get_u32, set_u32;
        i32 => get_i32, set_i32;
        u64 => get_u64, set_u64;
        i64 => get_i64, set_i64;
        f32 => get_f32, set_f32;
        f64 => get_f64, set_f64;
    }

    /// Copies the whole data buffer
    pub fn data(&self, id: i32) -> Result<Vec<u8>> {
        self.tags
            .get(id)?
            .locked(|tag| tag.with_data(|buf| Ok(buf.as_slice().to_vec())))
    }

    /// The tag behind a handle, for inspection
    pub fn tag(&self, id: i32) -> Result<Shared<Tag>> {
        Ok(self.tags.get(id)?.tag.clone())
    }

    pub fn tag_ids(&self) -> Vec<i32> {
        self.tags.ids()
    }

    /// Number of sessions currently alive
    pub fn live_sessions(&self) -> usize {
        self.sessions.live_sessions()
    }

    /// Number of tracked objects (tags, sessions, requests, buffers)
    pub fn live_objects(&self) -> usize {
        self.registry.live_count()
    }

    /// Async [`EipClient::read`]; waits with `tokio::time`
    pub async fn read_async(&self, id: i32, timeout: Duration) -> Status {
        let entry = match self.tags.get(id) {
            Ok(entry) => entry,
            Err(e) => return Status::Err(e),
        };
        if let Err(e) = entry.locked(|tag| tag.start_read()) {
            return Status::Err(e);
        }
        self.settle_async(&entry.tag, timeout).await
    }

    /// Async [`EipClient::write`]
    pub async fn write_async(&self, id: i32, timeout: Duration) -> Status {
        let entry = match self.tags.get(id) {
            Ok(entry) => entry,
            Err(e) => return Status::Err(e),
        };
        if let Err(e) = entry.locked(|tag| tag.start_write()) {
            return Status::Err(e);
        }
        self.settle_async(&entry.tag, timeout).await
    }

    /// Waits until the tag's status is no longer pending
    pub async fn wait_for_status_async(&self, id: i32, timeout: Duration) -> Status {
        match self.tags.get(id) {
            Ok(entry) => self.settle_async(&entry.tag, timeout).await,
            Err(e) => Status::Err(e),
        }
    }

    /// Reads the Identity object of the device at `endpoint`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use logix_eip::{ClientConfig, EipClient};
    /// # use std::time::Duration;
    /// let client = EipClient::new(ClientConfig::default())?;
    /// let identity = client.controller_identity("192.168.1.10,1,0", Duration::from_secs(2))?;
    /// println!("{}", identity);
    /// # Ok::<(), logix_eip::EipError>(())
    /// ```
    pub fn controller_identity(&self, endpoint: &str, timeout: Duration) -> Result<ControllerIdentity> {
        let deadline = Instant::now() + timeout;
        let poll = self.config.poll_interval();
        let session = self.sessions.get_or_open(endpoint)?;

        loop {
            match session.status() {
                Status::Ok => break,
                Status::Err(e) => return Err(e),
                Status::Pending if Instant::now() >= deadline => return Err(EipError::Timeout),
                Status::Pending => thread::sleep(poll),
            }
        }

        let request = self.registry.make(Request::get_attribute_list(
            cip::IDENTITY_CLASS,
            1,
            &ControllerIdentity::attribute_ids(),
            "identity",
        )?)?;
        session.queue_request(request.clone())?;

        loop {
            match request.status() {
                Status::Ok => break,
                Status::Err(e) => return Err(e),
                Status::Pending if Instant::now() >= deadline => {
                    request.abort();
                    return Err(EipError::Timeout);
                }
                Status::Pending => thread::sleep(poll),
            }
        }

        let response = request
            .take_completion()
            .and_then(|completion| completion.response)
            .ok_or_else(|| EipError::NoData("identity reply carried no data".to_string()))?;
        let data = response.lock();
        ControllerIdentity::decode(data.as_slice())
    }

    /// Destroys all tags, stops the workers and reports leaked objects.
    /// Returns the number of objects still alive afterwards.
    pub fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return self.registry.live_count();
        }

        let entries = self.tags.clear();
        for entry in &entries {
            entry.job.cancel();
        }
        drop(entries);

        self.scheduler.shutdown();
        let leaked = self.registry.shutdown();
        tracing::info!(leaked, "EtherNet/IP client stopped");
        leaked
    }

    fn settle(&self, tag: &Tag, timeout: Duration) -> Status {
        if timeout.is_zero() {
            return Status::Pending;
        }
        self.wait(tag, timeout)
    }

    fn wait(&self, tag: &Tag, timeout: Duration) -> Status {
        let deadline = Instant::now() + timeout;
        let poll = self.config.poll_interval();
        loop {
            let status = tag.status();
            if !status.is_pending() {
                return status;
            }
            if Instant::now() >= deadline {
                tag.abort();
                return Status::Err(EipError::Timeout);
            }
            thread::sleep(poll);
        }
    }

    async fn settle_async(&self, tag: &Tag, timeout: Duration) -> Status {
        if timeout.is_zero() {
            return tag.status();
        }
        let poll = self.config.poll_interval();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let status = tag.status();
                if !status.is_pending() {
                    return status;
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;

        match waited {
            Ok(status) => status,
            Err(_) => {
                tag.abort();
                Status::Err(EipError::Timeout)
            }
        }
    }
}

impl Drop for EipClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for EipClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EipClient")
            .field("tags", &self.tags.len())
            .field("sessions", &self.sessions)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
