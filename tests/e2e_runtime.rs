//! End-to-end runtime tests: the serve loop over an in-process transport,
//! service dispatch, timers and the server registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use opcua_engine::runtime::services::{
    BrowseNextRequest, BrowseRequest, CallRequest, CreateMonitoredItemsRequest, CreateSubscriptionRequest,
    ReadRequest, RequestEnvelope, ResponseEnvelope, ServiceRequest, ServiceResponse, WriteRequest, WriteValue,
};
use opcua_engine::runtime::{Argument, CallMethodRequest, ChannelTransport, ClientEndpoint};
use opcua_engine::subscription::{MonitoredItemCreateRequest, PublishRequest, SubscriptionParams};
use opcua_engine::{
    ids, BrowseDescription, BuiltinType, Error, NodeId, QualifiedName, ServerConfig, ServerHooks, ServerRegistry,
    ServerRuntime, SessionId, StatusCode, TimestampsToReturn, Variant,
};
use pretty_assertions::assert_eq;

fn runtime() -> (ServerRuntime, SessionId) {
    let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
    let session = rt.create_session("client", 60_000.0).unwrap().id;
    rt.activate_session(session, None).unwrap();
    (rt, session)
}

fn send(rt: &ServerRuntime, session: SessionId, handle: u32, request: ServiceRequest) -> ServiceResponse {
    rt.handle(RequestEnvelope::new(session, handle, request)).unwrap().response
}

async fn exchange(client: &mut ClientEndpoint, envelope: RequestEnvelope) -> ResponseEnvelope {
    client.send(envelope).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), client.recv())
        .await
        .expect("response within five seconds")
        .expect("transport open")
}

// ============================================================================
// 1. Serve loop over a channel transport
// ============================================================================

#[tokio::test]
async fn test_serve_loop_answers_read_and_browse() {
    let (rt, session) = runtime();
    let plant = rt.address_space().add_folder(&NodeId::OBJECTS, "Plant", 1).unwrap();
    let speed = rt.address_space().add_variable(&plant, "Speed", 42.5f64, 1).unwrap();
    let (transport, mut client) = ChannelTransport::pair();
    let stop = rt.stop_handle();

    let client_side = async move {
        let read = exchange(
            &mut client,
            RequestEnvelope::new(session, 11, ServiceRequest::Read(ReadRequest::values(vec![speed]))),
        )
        .await;
        assert_eq!(read.request_handle, 11);
        let ServiceResponse::Read(read) = read.response else {
            panic!("expected a read response");
        };
        assert_eq!(read.results[0].value, Variant::Double(42.5));

        let browse = BrowseRequest::new(0).node(plant, BrowseDescription::forward(ids::HAS_COMPONENT));
        let browsed = exchange(&mut client, RequestEnvelope::new(session, 12, ServiceRequest::Browse(browse))).await;
        assert_eq!(browsed.request_handle, 12);
        let ServiceResponse::Browse(browsed) = browsed.response else {
            panic!("expected a browse response");
        };
        let names: Vec<_> = browsed.results[0].references.iter().filter_map(|r| r.browse_name.clone()).collect();
        assert_eq!(names, vec![QualifiedName::new(1, "Speed")]);

        stop.stop();
    };

    let (served, ()) = tokio::join!(rt.run(&transport), client_side);
    served.unwrap();
    assert!(rt.is_stopped());
    assert_eq!(rt.session_count(), 0, "shutdown closes every session");
}

#[tokio::test]
async fn test_serve_loop_delivers_queued_publish() {
    let (rt, session) = runtime();
    let level = rt.address_space().add_variable(&NodeId::OBJECTS, "Level", 3i32, 1).unwrap();
    let (transport, mut client) = ChannelTransport::pair();
    let stop = rt.stop_handle();

    let client_side = async move {
        let created = exchange(
            &mut client,
            RequestEnvelope::new(
                session,
                1,
                ServiceRequest::CreateSubscription(CreateSubscriptionRequest { params: SubscriptionParams::new(20.0) }),
            ),
        )
        .await;
        let ServiceResponse::CreateSubscription(revised) = created.response else {
            panic!("expected a subscription");
        };

        let items = CreateMonitoredItemsRequest {
            subscription_id: revised.id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_create: vec![MonitoredItemCreateRequest::value(level, 5)],
        };
        let monitored = exchange(&mut client, RequestEnvelope::new(session, 2, ServiceRequest::CreateMonitoredItems(items))).await;
        assert!(monitored.response.fault().is_none());

        let published =
            exchange(&mut client, RequestEnvelope::new(session, 3, ServiceRequest::Publish(PublishRequest::default()))).await;
        assert_eq!(published.request_handle, 3);
        let ServiceResponse::Publish(published) = published.response else {
            panic!("expected a publish response");
        };
        assert_eq!(published.subscription_id, revised.id);
        let values: Vec<_> = published.message.data_changes().map(|n| (n.client_handle, n.value.value.clone())).collect();
        assert_eq!(values, vec![(5, Variant::Int32(3))]);

        stop.stop();
    };

    let (served, ()) = tokio::join!(rt.run(&transport), client_side);
    served.unwrap();
}

#[derive(Default)]
struct ShutdownCounter {
    shutdowns: AtomicUsize,
}

impl ServerHooks for ShutdownCounter {
    fn shutdown(&self, _runtime: &ServerRuntime) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_failed_send_still_shuts_down() {
    let (rt, session) = runtime();
    let hooks = Arc::new(ShutdownCounter::default());
    rt.set_hooks(hooks.clone());
    let (transport, client) = ChannelTransport::pair();

    client
        .send(RequestEnvelope::new(session, 1, ServiceRequest::Read(ReadRequest::values(vec![NodeId::OBJECTS]))))
        .unwrap();
    drop(client);

    let served = tokio::time::timeout(StdDuration::from_secs(5), rt.run(&transport))
        .await
        .expect("run ends once the response cannot be delivered");
    assert!(matches!(served, Err(Error::Io(_))));
    assert_eq!(hooks.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(rt.session_count(), 0);
}

// ============================================================================
// 2. Service dispatch
// ============================================================================

#[test]
fn test_browse_next_pages_and_releases() {
    let (rt, session) = runtime();
    let line = rt.address_space().add_folder(&NodeId::OBJECTS, "Line", 1).unwrap();
    for i in 0..5 {
        rt.address_space().add_folder(&line, &format!("Cell{i}"), 1).unwrap();
    }
    let browse = || ServiceRequest::Browse(BrowseRequest::new(2).node(line.clone(), BrowseDescription::forward(ids::ORGANIZES)));

    let ServiceResponse::Browse(first) = send(&rt, session, 1, browse()) else {
        panic!("expected a browse response");
    };
    let mut seen = first.results[0].references.len();
    let mut cp = first.results[0].continuation_point;
    let mut pages = 1;
    while let Some(point) = cp {
        let next = BrowseNextRequest { release_continuation_points: false, continuation_points: vec![point] };
        let ServiceResponse::BrowseNext(page) = send(&rt, session, 2, ServiceRequest::BrowseNext(next)) else {
            panic!("expected a browse-next response");
        };
        assert_eq!(page.results[0].status, StatusCode::GOOD);
        seen += page.results[0].references.len();
        cp = page.results[0].continuation_point;
        pages += 1;
    }
    assert_eq!((seen, pages), (5, 3));

    let ServiceResponse::Browse(again) = send(&rt, session, 3, browse()) else {
        panic!("expected a browse response");
    };
    let point = again.results[0].continuation_point.unwrap();
    let release = BrowseNextRequest { release_continuation_points: true, continuation_points: vec![point] };
    let ServiceResponse::BrowseNext(released) = send(&rt, session, 4, ServiceRequest::BrowseNext(release.clone())) else {
        panic!("expected a browse-next response");
    };
    assert_eq!(released.results[0].status, StatusCode::GOOD);
    assert!(released.results[0].references.is_empty());

    let ServiceResponse::BrowseNext(stale) = send(&rt, session, 5, ServiceRequest::BrowseNext(release)) else {
        panic!("expected a browse-next response");
    };
    assert_eq!(stale.results[0].status, StatusCode::BAD_CONTINUATION_POINT_INVALID);
}

#[test]
fn test_browse_continuation_points_are_limited_per_session() {
    let (rt, session) = runtime();
    let line = rt.address_space().add_folder(&NodeId::OBJECTS, "Line", 1).unwrap();
    for i in 0..3 {
        rt.address_space().add_folder(&line, &format!("Cell{i}"), 1).unwrap();
    }
    let statuses: Vec<StatusCode> = (0..11)
        .map(|handle| {
            let request = BrowseRequest::new(1).node(line.clone(), BrowseDescription::forward(ids::ORGANIZES));
            match send(&rt, session, handle, ServiceRequest::Browse(request)) {
                ServiceResponse::Browse(r) => r.results[0].status,
                other => panic!("unexpected {other:?}"),
            }
        })
        .collect();
    assert!(statuses[..10].iter().all(|s| *s == StatusCode::GOOD));
    assert_eq!(statuses[10], StatusCode::BAD_NO_CONTINUATION_POINTS);
}

#[test]
fn test_write_then_read_through_dispatch() {
    let (rt, session) = runtime();
    let setpoint = rt.address_space().add_variable(&NodeId::OBJECTS, "Setpoint", 0.0f64, 1).unwrap();

    let write = WriteRequest {
        nodes_to_write: vec![
            WriteValue::value(setpoint.clone(), 55.0f64),
            WriteValue::value(setpoint.clone(), "not a number"),
            WriteValue::value(NodeId::numeric(1, 9_999_999), 1.0f64),
        ],
    };
    let ServiceResponse::Write(written) = send(&rt, session, 1, ServiceRequest::Write(write)) else {
        panic!("expected a write response");
    };
    assert_eq!(written.results[0], StatusCode::GOOD);
    assert!(written.results[1].is_bad());
    assert_eq!(written.results[2], StatusCode::BAD_NODE_ID_UNKNOWN);

    let ServiceResponse::Read(read) = send(&rt, session, 2, ServiceRequest::Read(ReadRequest::values(vec![setpoint]))) else {
        panic!("expected a read response");
    };
    assert_eq!(read.results[0].value, Variant::Double(55.0));
}

#[test]
fn test_call_dispatch_runs_method() {
    let (rt, session) = runtime();
    let pump = rt.address_space().add_folder(&NodeId::OBJECTS, "Pump", 1).unwrap();
    let scale = rt
        .add_method(
            &pump,
            "1:Scale",
            vec![Argument::new("value", BuiltinType::Double)],
            vec![Argument::new("scaled", BuiltinType::Double)],
            |_, _, inputs| match inputs {
                [Variant::Double(v)] => Ok(vec![Variant::Double(v * 2.0)]),
                _ => Err(Error::InvalidArgument("expected one double".into())),
            },
        )
        .unwrap();

    let request = CallRequest {
        methods_to_call: vec![
            CallMethodRequest::new(pump.clone(), scale.clone(), vec![Variant::Double(2.5)]),
            CallMethodRequest::new(NodeId::OBJECTS, scale, vec![Variant::Double(1.0)]),
        ],
    };
    let ServiceResponse::Call(called) = send(&rt, session, 1, ServiceRequest::Call(request)) else {
        panic!("expected a call response");
    };
    assert_eq!(called.results[0].status, StatusCode::GOOD);
    assert_eq!(called.results[0].output_arguments, vec![Variant::Double(5.0)]);
    assert_eq!(called.results[1].status, StatusCode::BAD_METHOD_INVALID);
}

#[test]
fn test_requests_after_close_fault() {
    let (rt, session) = runtime();
    rt.close_session(session).unwrap();
    let response = send(&rt, session, 1, ServiceRequest::Read(ReadRequest::values(vec![NodeId::OBJECTS])));
    assert_eq!(response.fault(), Some(StatusCode::BAD_SESSION_ID_INVALID));
}

// ============================================================================
// 3. Timers
// ============================================================================

#[test]
fn test_repeated_timer_drives_a_variable() {
    let (rt, session) = runtime();
    let ticks = rt.address_space().add_variable(&NodeId::OBJECTS, "Ticks", 0i32, 1).unwrap();
    let target = ticks.clone();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let timer = rt.add_repeated_callback(StdDuration::from_millis(100), move |rt, _| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = rt.address_space().set_value(&target, Variant::Int32(n as i32));
    });

    let start = Utc::now();
    for step in 1..=3 {
        rt.iterate_at(start + Duration::milliseconds(150 * step));
    }
    assert_eq!(fired.load(Ordering::SeqCst), 3);
    let ServiceResponse::Read(read) = send(&rt, session, 1, ServiceRequest::Read(ReadRequest::values(vec![ticks]))) else {
        panic!("expected a read response");
    };
    assert_eq!(read.results[0].value, Variant::Int32(3));

    assert!(rt.remove_timer(timer));
    rt.iterate_at(start + Duration::seconds(10));
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

// ============================================================================
// 4. Registry
// ============================================================================

#[test]
fn test_registered_servers_are_isolated() {
    let registry = ServerRegistry::new();
    let line1 = registry.create(ServerConfig::default().with_application_name("line1")).unwrap();
    let line2 = registry.create(ServerConfig::default().with_application_name("line2")).unwrap();
    let before = line2.address_space().node_count();

    line1.address_space().add_folder(&NodeId::OBJECTS, "OnlyHere", 1).unwrap();
    assert_eq!(line2.address_space().node_count(), before);
    assert!(registry
        .get("line1")
        .unwrap()
        .address_space()
        .get_child(&NodeId::OBJECTS, &QualifiedName::new(1, "OnlyHere"))
        .is_some());

    assert!(matches!(
        registry.create(ServerConfig::default().with_application_name("line1")),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(registry.names(), vec!["line1".to_string(), "line2".to_string()]);
}
