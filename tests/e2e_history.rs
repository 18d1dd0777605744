//! End-to-end historian tests: live recording through variable writes,
//! bounded buffers, paging and client-side updates.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use opcua_engine::config::HistoryConfig;
use opcua_engine::history::{HistoryBackend, HistoryData, UpdateKind};
use opcua_engine::model::access_level;
use opcua_engine::runtime::services::{HistoryReadRequest, HistoryUpdateDetails, HistoryUpdateRequest};
use opcua_engine::{
    DataValue, MemoryHistorian, NodeId, PermissiveAccessControl, ReadRawDetails, ServerConfig, ServerRuntime,
    SessionId, StatusCode, VariableAttributes, Variant,
};
use pretty_assertions::assert_eq;

fn ints(data: &HistoryData) -> Vec<i32> {
    data.values
        .iter()
        .map(|v| match v.value {
            Variant::Int32(i) => i,
            _ => -1,
        })
        .collect()
}

fn setup(capacity: usize, page_size: usize) -> (ServerRuntime, SessionId, NodeId) {
    let config = ServerConfig::default().with_history(HistoryConfig { default_capacity: capacity, page_size });
    let rt = ServerRuntime::new(config).unwrap();
    let session = rt.create_session("historian-client", 0.0).unwrap().id;
    rt.activate_session(session, None).unwrap();
    let attrs = VariableAttributes::new(0i32).historizing().with_access_level(access_level::ALL);
    let node = rt.address_space().add_variable_with(&NodeId::OBJECTS, "FlowRate", attrs, 1).unwrap();
    (rt, session, node)
}

fn record(rt: &ServerRuntime, node: &NodeId, base: DateTime<Utc>, count: i32) {
    for i in 0..count {
        rt.address_space()
            .set_data_value(node, DataValue::new_at(i, base + Duration::seconds(i64::from(i))))
            .unwrap();
    }
}

#[test]
fn test_ring_of_100_keeps_last_100_of_150() {
    let (rt, session, node) = setup(100, 1000);
    record(&rt, &node, Utc::now() - Duration::hours(1), 150);

    let response = rt.history_read(session, &HistoryReadRequest::raw(ReadRawDetails::all(), vec![node])).unwrap();
    let result = &response.results[0];
    assert_eq!(result.status, StatusCode::GOOD);
    assert_eq!(ints(&result.data), (50..150).collect::<Vec<_>>());
    assert!(result.data.continuation_point.is_none());
}

#[test]
fn test_direct_backend_eviction() {
    let historian = MemoryHistorian::new(100, 1000);
    let node = NodeId::numeric(1, 7);
    let base = Utc::now() - Duration::hours(1);
    for i in 0..150i32 {
        historian.record_update(&node, DataValue::new_at(i, base + Duration::seconds(i64::from(i))));
    }
    assert_eq!(historian.value_count(&node), 100);
    let data = historian.read_raw(&ReadRawDetails::all(), &node, None).unwrap();
    assert_eq!(ints(&data).first(), Some(&50));
    assert_eq!(ints(&data).last(), Some(&149));
}

#[test]
fn test_paging_follows_continuation_points() {
    let (rt, session, node) = setup(1000, 4);
    record(&rt, &node, Utc::now() - Duration::hours(1), 10);

    let mut request = HistoryReadRequest::raw(ReadRawDetails::all(), vec![node]);
    let mut pages = Vec::new();
    loop {
        let mut response = rt.history_read(session, &request).unwrap();
        let result = response.results.remove(0);
        assert_eq!(result.status, StatusCode::GOOD);
        pages.push(ints(&result.data));
        match result.data.continuation_point {
            Some(cp) => request.nodes_to_read[0].continuation_point = Some(cp),
            None => break,
        }
    }
    assert_eq!(pages, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
}

#[test]
fn test_time_window_and_reverse_order() {
    let (rt, session, node) = setup(1000, 1000);
    let base = Utc::now() - Duration::hours(1);
    record(&rt, &node, base, 10);

    let window = ReadRawDetails::new(base + Duration::seconds(2), base + Duration::seconds(5));
    let forward = rt.history_read(session, &HistoryReadRequest::raw(window, vec![node.clone()])).unwrap();
    assert_eq!(ints(&forward.results[0].data), vec![2, 3, 4, 5]);

    let reverse = ReadRawDetails::new(base + Duration::seconds(5), base + Duration::seconds(2));
    let backward = rt.history_read(session, &HistoryReadRequest::raw(reverse, vec![node])).unwrap();
    assert_eq!(ints(&backward.results[0].data), vec![5, 4, 3, 2]);
}

#[test]
fn test_unregistered_node_reads_empty() {
    let (rt, session, _) = setup(1000, 1000);
    let plain = rt
        .address_space()
        .add_variable_with(&NodeId::OBJECTS, "Plain", VariableAttributes::new(1i32).with_access_level(access_level::ALL), 1)
        .unwrap();
    let response = rt.history_read(session, &HistoryReadRequest::raw(ReadRawDetails::all(), vec![plain])).unwrap();
    assert_eq!(response.results[0].status, StatusCode::GOOD);
    assert!(response.results[0].data.values.is_empty());
}

#[test]
fn test_client_updates_need_permission() {
    let (rt, session, node) = setup(1000, 1000);
    let base = Utc::now() - Duration::hours(1);
    record(&rt, &node, base, 3);

    let replace = || HistoryUpdateRequest {
        details: vec![HistoryUpdateDetails::UpdateData {
            node_id: node.clone(),
            kind: UpdateKind::Replace,
            values: vec![DataValue::new_at(100i32, base + Duration::seconds(1))],
        }],
    };
    let denied = rt.history_update(session, replace()).unwrap();
    assert_eq!(denied.results[0].status, StatusCode::BAD_USER_ACCESS_DENIED);

    rt.set_access_control(Arc::new(PermissiveAccessControl));
    let replaced = rt.history_update(session, replace()).unwrap();
    assert_eq!(replaced.results[0].status, StatusCode::GOOD);
    assert_eq!(replaced.results[0].operation_results.len(), 1);
    assert!(replaced.results[0].operation_results[0].is_good());

    let read = rt.history_read(session, &HistoryReadRequest::raw(ReadRawDetails::all(), vec![node.clone()])).unwrap();
    assert_eq!(ints(&read.results[0].data), vec![0, 100, 2]);

    let delete = HistoryUpdateRequest {
        details: vec![HistoryUpdateDetails::DeleteRawModified {
            node_id: node.clone(),
            start: base,
            end: base + Duration::seconds(1),
        }],
    };
    assert_eq!(rt.history_update(session, delete).unwrap().results[0].status, StatusCode::GOOD);
    let read = rt.history_read(session, &HistoryReadRequest::raw(ReadRawDetails::all(), vec![node])).unwrap();
    assert_eq!(ints(&read.results[0].data), vec![2]);
}
