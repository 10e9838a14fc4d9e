mod common;

use common::{fast_config, wait_until, MockPlc};
use logix_eip::cip::CipType;
use logix_eip::error::{EipError, Status};
use logix_eip::job::Scheduler;
use logix_eip::request::Request;
use logix_eip::resource::{ResourceRegistry, Shared};
use logix_eip::session::{SessionManager, SessionPhase};
use logix_eip::tag_path::TagPath;
use logix_eip::transport::TcpConnector;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    registry: Arc<ResourceRegistry>,
    sessions: SessionManager,
}

fn harness(reply_timeout_ms: u64) -> Harness {
    let mut config = fast_config();
    config.connection.reply_timeout_ms = reply_timeout_ms;
    let registry = ResourceRegistry::new("session-tests");
    let scheduler = Scheduler::new(&config.scheduler).unwrap();
    let sessions = SessionManager::new(
        Arc::clone(&registry),
        scheduler,
        Arc::new(TcpConnector),
        config.connection,
    );
    Harness { registry, sessions }
}

fn read_request(h: &Harness, name: &str, count: u16) -> Shared<Request> {
    let encoded = TagPath::parse(name).unwrap().to_bytes().unwrap();
    h.registry.make(Request::read(&encoded, count, name)).unwrap()
}

#[test]
fn test_register_and_read_through_route() {
    let plc = MockPlc::start();
    plc.set_tag("Speed", CipType::Dint, &1500i32.to_le_bytes());
    let h = harness(1000);

    let session = h.sessions.get_or_open(&plc.endpoint()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || session.status().is_ok()));
    assert_eq!(session.phase(), SessionPhase::Running);
    assert_eq!(session.session_handle(), Some(0x1000));
    assert_eq!(plc.register_count(), 1);

    let request = read_request(&h, "Speed", 1);
    session.queue_request(request.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || request.is_done()));
    assert_eq!(request.status(), Status::Ok);

    let completion = request.take_completion().unwrap();
    assert_eq!(completion.type_info, vec![0xC4, 0x00]);
    let data = completion.response.unwrap();
    assert_eq!(data.lock().get_i32(0).unwrap(), 1500);
}

#[test]
fn test_same_endpoint_registers_once() {
    let plc = MockPlc::start();
    let h = harness(1000);

    let a = h.sessions.get_or_open(&plc.endpoint()).unwrap();
    let b = h.sessions.get_or_open(&plc.endpoint()).unwrap();
    assert!(Shared::ptr_eq(&a, &b));
    assert!(wait_until(Duration::from_secs(2), || a.status().is_ok()));
    assert_eq!(h.sessions.live_sessions(), 1);
    assert_eq!(plc.register_count(), 1);
    assert_eq!(plc.connections(), 1);
}

#[test]
fn test_unknown_tag_reports_cip_status() {
    let plc = MockPlc::start();
    let h = harness(1000);
    let session = h.sessions.get_or_open(&plc.endpoint()).unwrap();

    let request = read_request(&h, "Missing", 1);
    session.queue_request(request.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || request.is_done()));
    assert_eq!(
        request.status(),
        Status::Err(EipError::CipStatus {
            general: 0x04,
            extended: None
        })
    );
    // the session survives a per-request failure
    assert!(session.status().is_ok());
}

#[test]
fn test_requests_are_served_in_order() {
    let plc = MockPlc::start();
    plc.set_tag("A", CipType::Int, &7i16.to_le_bytes());
    plc.set_tag("B", CipType::Int, &9i16.to_le_bytes());
    let h = harness(1000);
    let session = h.sessions.get_or_open(&plc.endpoint()).unwrap();

    let first = read_request(&h, "A", 1);
    let second = read_request(&h, "B", 1);
    session.queue_request(first.clone()).unwrap();
    session.queue_request(second.clone()).unwrap();

    assert!(wait_until(Duration::from_secs(2), || first.is_done() && second.is_done()));
    let a = first.take_completion().unwrap().response.unwrap();
    let b = second.take_completion().unwrap().response.unwrap();
    assert_eq!(a.lock().get_i16(0).unwrap(), 7);
    assert_eq!(b.lock().get_i16(0).unwrap(), 9);
    assert_eq!(plc.request_count(), 2);
}

#[test]
fn test_reply_timeout_fails_and_evicts_session() {
    let plc = MockPlc::start();
    plc.set_tag("Slow", CipType::Dint, &[0; 4]);
    plc.set_reply_delay(Duration::from_millis(800));
    let h = harness(200);

    let session = h.sessions.get_or_open(&plc.endpoint()).unwrap();
    let request = read_request(&h, "Slow", 1);
    session.queue_request(request.clone()).unwrap();

    assert!(wait_until(Duration::from_secs(3), || request.is_done()));
    assert_eq!(request.status(), Status::Err(EipError::Timeout));
    assert!(wait_until(Duration::from_secs(1), || session.status().error().is_some()));

    let late = read_request(&h, "Slow", 1);
    assert!(session.queue_request(late).is_err());

    plc.set_reply_delay(Duration::ZERO);
    let fresh = h.sessions.get_or_open(&plc.endpoint()).unwrap();
    assert!(!Shared::ptr_eq(&session, &fresh));
    assert!(wait_until(Duration::from_secs(2), || fresh.status().is_ok()));
    assert_eq!(plc.register_count(), 2);
}

#[test]
fn test_last_user_gone_unregisters() {
    let plc = MockPlc::start();
    let h = harness(1000);

    let session = h.sessions.get_or_open(&plc.endpoint()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || session.status().is_ok()));
    drop(session);

    assert!(wait_until(Duration::from_secs(2), || plc.unregister_count() == 1));
    assert!(wait_until(Duration::from_secs(1), || h.sessions.live_sessions() == 0));
    assert!(wait_until(Duration::from_secs(1), || h.registry.live_count() == 0));
}
