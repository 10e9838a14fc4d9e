// Shared helpers for integration tests: an in-process controller that
// speaks enough EtherNet/IP and CIP to serve Register Session, Read Tag,
// Write Tag and the Identity attribute list.
#![allow(dead_code)]

use logix_eip::buffer::ByteBuffer;
use logix_eip::cip::{self, CipType};
use logix_eip::config::ClientConfig;
use logix_eip::eip;
use logix_eip::tag_path::TagPath;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const PRODUCT_NAME: &str = "1756-L83E/B";
pub const SERIAL_NUMBER: u32 = 0x00C0_FFEE;

#[derive(Clone)]
struct MockTag {
    type_info: Vec<u8>,
    data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    tags: Mutex<HashMap<String, MockTag>>,
    connections: AtomicUsize,
    registers: AtomicUsize,
    unregisters: AtomicUsize,
    requests: AtomicUsize,
    reply_delay_ms: AtomicU64,
    next_handle: AtomicU32,
}

pub struct MockPlc {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockPlc {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock controller");
        let addr = listener.local_addr().expect("mock controller address");
        let state = Arc::new(MockState {
            next_handle: AtomicU32::new(0x1000),
            ..MockState::default()
        });

        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let conn_state = Arc::clone(&accept_state);
                thread::spawn(move || serve(stream, &conn_state));
            }
        });

        Self { addr, state }
    }

    pub fn gateway(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// Endpoint string routed to the processor in slot 0
    pub fn endpoint(&self) -> String {
        format!("{},1,0", self.gateway())
    }

    pub fn attrs(&self, name: &str, extra: &str) -> String {
        format!(
            "protocol=ab_eip&gateway={}&path=1,0&name={}{}",
            self.gateway(),
            name,
            extra
        )
    }

    pub fn set_tag(&self, name: &str, cip_type: CipType, data: &[u8]) {
        self.state.tags.lock().insert(
            canonical(name),
            MockTag {
                type_info: cip_type.type_header().to_vec(),
                data: data.to_vec(),
            },
        );
    }

    pub fn tag_data(&self, name: &str) -> Option<Vec<u8>> {
        self.state.tags.lock().get(&canonical(name)).map(|t| t.data.clone())
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        self.state
            .reply_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn register_count(&self) -> usize {
        self.state.registers.load(Ordering::SeqCst)
    }

    pub fn unregister_count(&self) -> usize {
        self.state.unregisters.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

/// Client configuration with short timeouts and a quick retry schedule
pub fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.connection.connect_timeout_ms = 500;
    config.connection.reply_timeout_ms = 1000;
    config.retry.backoff_ms = vec![10, 20, 40];
    config.poll_interval_ms = 2;
    config
}

/// Polls `check` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    check()
}

fn canonical(name: &str) -> String {
    TagPath::parse(name).expect("valid tag name").to_string()
}

fn serve(mut stream: TcpStream, state: &MockState) {
    let _ = stream.set_nodelay(true);
    loop {
        let mut header = [0u8; eip::EIP_HEADER_SIZE];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let Ok(parsed) = eip::EipHeader::parse(&header) else { return };
        let mut payload = vec![0u8; parsed.length as usize];
        if stream.read_exact(&mut payload).is_err() {
            return;
        }

        let reply = match parsed.command {
            eip::CMD_REGISTER_SESSION => {
                state.registers.fetch_add(1, Ordering::SeqCst);
                let handle = state.next_handle.fetch_add(1, Ordering::SeqCst);
                let mut buf = ByteBuffer::from_vec(payload);
                let _ = eip::marshal_eip_header(
                    &mut buf,
                    eip::CMD_REGISTER_SESSION,
                    handle,
                    parsed.sender_context,
                );
                buf.into_vec()
            }
            eip::CMD_UNREGISTER_SESSION => {
                state.unregisters.fetch_add(1, Ordering::SeqCst);
                return;
            }
            eip::CMD_SEND_RR_DATA => {
                state.requests.fetch_add(1, Ordering::SeqCst);
                let delay = state.reply_delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    thread::sleep(Duration::from_millis(delay));
                }
                let cip_reply = match eip::unmarshal_cip_cfp_unconnected(&payload) {
                    Ok(cip) => handle_cip(state, cip),
                    Err(_) => return,
                };
                let mut buf = ByteBuffer::from_vec(cip_reply);
                let _ = eip::marshal_cip_cfp_unconnected(&mut buf, 0);
                let _ = eip::marshal_eip_header(
                    &mut buf,
                    eip::CMD_SEND_RR_DATA,
                    parsed.session_handle,
                    parsed.sender_context,
                );
                buf.into_vec()
            }
            _ => return,
        };

        if stream.write_all(&reply).is_err() {
            return;
        }
    }
}

fn handle_cip(state: &MockState, request: &[u8]) -> Vec<u8> {
    // Unconnected Send: service, CM path (5), tick, ticks, u16 length
    let embedded = if request.first() == Some(&cip::SERVICE_UNCONNECTED_SEND) && request.len() >= 10 {
        let len = u16::from_le_bytes([request[8], request[9]]) as usize;
        &request[10..(10 + len).min(request.len())]
    } else {
        request
    };

    let service = embedded.first().copied().unwrap_or(0);
    let reply_service = service | cip::REPLY_FLAG;
    let error = |status: u8| vec![reply_service, 0, status, 0];

    match service {
        cip::SERVICE_READ_TAG | cip::SERVICE_WRITE_TAG => {
            let Some(&words) = embedded.get(1) else { return error(0x04) };
            let path_end = 2 + words as usize * 2;
            let Some(path) = embedded.get(1..path_end).and_then(|p| TagPath::decode(p).ok()) else {
                return error(0x04);
            };
            let key = path.to_string();
            let rest = &embedded[path_end..];

            let mut tags = state.tags.lock();
            if service == cip::SERVICE_READ_TAG {
                match tags.get(&key) {
                    Some(tag) => {
                        let mut reply = vec![reply_service, 0, 0, 0];
                        reply.extend_from_slice(&tag.type_info);
                        reply.extend_from_slice(&tag.data);
                        reply
                    }
                    None => error(0x04),
                }
            } else {
                let Ok(type_len) = cip::type_header_len(rest) else { return error(0x13) };
                if rest.len() < type_len + 2 {
                    return error(0x13);
                }
                let type_info = rest[..type_len].to_vec();
                let data = rest[type_len + 2..].to_vec();
                match tags.get_mut(&key) {
                    Some(tag) => {
                        tag.type_info = type_info;
                        tag.data = data;
                        vec![reply_service, 0, 0, 0]
                    }
                    None => error(0x04),
                }
            }
        }
        cip::SERVICE_GET_ATTRIBUTE_LIST => identity_reply(reply_service),
        _ => error(0x08),
    }
}

fn identity_reply(reply_service: u8) -> Vec<u8> {
    let mut buf = ByteBuffer::new();
    buf.write_bytes(&[reply_service, 0, 0, 0]);
    buf.put_u16(6);
    for (id, value) in [(1u16, 1u16), (2, 0x0E), (3, 0xA6)] {
        buf.put_u16(id);
        buf.put_u16(0);
        buf.put_u16(value);
    }
    buf.put_u16(4);
    buf.put_u16(0);
    buf.write_bytes(&[33, 11]);
    buf.put_u16(6);
    buf.put_u16(0);
    buf.put_u32(SERIAL_NUMBER);
    buf.put_u16(7);
    buf.put_u16(0);
    buf.put_u8(PRODUCT_NAME.len() as u8);
    buf.write_bytes(PRODUCT_NAME.as_bytes());
    buf.into_vec()
}
