//! Integration tests for the supervisor lifecycle: start, subscribe, stop, restart.

mod common;

use std::time::{Duration, Instant};

use common::{ScriptedTransport, WAIT, contract, quiet_config, wait_until};
use option_common::contract::{OptionType, QuoteKey, WIRE_KEY_WIDTH};
use option_common::fields::SUBSCRIPTION_FIELDS;
use option_common::frame::{DataGroup, StreamFrame, SUBS_COMMAND};
use option_stream::{SessionState, StreamingManager, SubscribeMode};
use serde_json::json;

fn data_frame(key: &str, bid: f64) -> String {
    StreamFrame::data(1, vec![DataGroup::new(key, [("2", json!(bid))])])
        .to_json()
        .unwrap()
}

#[test]
fn start_subscribes_wire_keys_then_stop_is_idempotent() {
    let transport = ScriptedTransport::new();
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    assert_eq!(manager.get_status().state, SessionState::Idle);

    let keys = [
        contract("AAPL", OptionType::Call, 190.0),
        contract("AAPL", OptionType::Put, 190.0),
        contract("AAPL", OptionType::Call, 190.0),
    ];
    assert!(manager.start(&keys));
    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Streaming));

    let subscriptions = transport.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    let (wire_keys, fields, mode) = &subscriptions[0];
    assert_eq!(wire_keys, &vec!["AAPL  240621C00190000".to_string(), "AAPL  240621P00190000".to_string()]);
    assert!(wire_keys.iter().all(|k| k.len() == WIRE_KEY_WIDTH));
    assert_eq!(fields.as_slice(), SUBSCRIPTION_FIELDS);
    assert_eq!(*mode, SubscribeMode::Add);
    assert!(manager.get_status().is_running);

    assert!(manager.stop());
    let status = manager.get_status();
    assert_eq!(status.state, SessionState::Stopped);
    assert!(!status.is_running);
    assert_eq!(status.status_message, "Streaming stopped");
    assert_eq!(transport.closes(), 1);

    assert!(!manager.stop());
    assert_eq!(manager.get_status().state, SessionState::Stopped);
}

#[test]
fn immediate_stop_leaves_nothing_running() {
    let transport = ScriptedTransport::new();
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    assert!(manager.start(&[contract("SPY", OptionType::Call, 500.0)]));
    assert!(manager.stop());

    let status = manager.get_status();
    assert!(!status.is_running);
    assert!(manager.get_latest_data().is_empty());
    assert!(!transport.push(&data_frame("SPY   240621C00500000", 1.0)));
}

#[test]
fn empty_contract_list_is_rejected() {
    let manager = StreamingManager::new(ScriptedTransport::new(), quiet_config()).unwrap();
    assert!(!manager.start(&[]));
    let status = manager.get_status();
    assert_eq!(status.state, SessionState::Idle);
    assert!(status.error_message.is_some());
    assert!(!manager.stop());
}

#[test]
fn connect_failure_is_terminal() {
    let transport = ScriptedTransport::new();
    transport.fail_connect(true);
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    assert!(manager.start(&[contract("AAPL", OptionType::Call, 190.0)]));

    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Failed));
    let status = manager.get_status();
    assert!(!status.is_running);
    assert!(status.error_message.unwrap().contains("connect"));

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(transport.connects(), 1);
    assert!(transport.subscriptions().is_empty());
}

#[test]
fn subscribe_failure_is_terminal_and_closes_the_session() {
    let transport = ScriptedTransport::new();
    transport.fail_subscribe(true);
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    assert!(manager.start(&[contract("AAPL", OptionType::Call, 190.0)]));

    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Failed));
    assert!(manager.get_status().error_message.unwrap().contains("Subscribe failed"));
    assert_eq!(transport.closes(), 1);
    assert!(!manager.stop());
}

#[test]
fn acknowledged_data_reaches_the_store() {
    let transport = ScriptedTransport::new();
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    let key = contract("AAPL", OptionType::Call, 190.0);
    manager.start(&[key.clone()]);
    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Streaming));

    assert!(transport.push(&StreamFrame::command_reply(SUBS_COMMAND, 0, "ok").to_json().unwrap()));
    assert!(transport.push(&StreamFrame::heartbeat(1).to_json().unwrap()));
    assert!(transport.push(&data_frame(&key.encode_wire(), 1.25)));

    assert!(wait_until(WAIT, || manager.get_status().quote_count == 1));
    let status = manager.get_status();
    assert_eq!(status.subscribed_count, 1);
    assert!(status.last_data_update.is_some());
    assert!(wait_until(WAIT, || manager.get_status().messages_processed == 3));
    assert!(manager.get_status().last_heartbeat.is_some());

    let data = manager.get_latest_data();
    assert_eq!(data[&QuoteKey::Contract(key)].bid_price, Some(1.25));
}

#[test]
fn rejected_subscription_is_reported_without_stopping() {
    let transport = ScriptedTransport::new();
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    manager.start(&[contract("AAPL", OptionType::Call, 190.0)]);
    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Streaming));

    transport.push(&StreamFrame::command_reply(SUBS_COMMAND, 3, "bad symbol").to_json().unwrap());
    assert!(wait_until(WAIT, || manager.get_status().error_message.is_some()));
    let status = manager.get_status();
    assert!(status.error_message.unwrap().contains("bad symbol"));
    assert_eq!(status.state, SessionState::Streaming);
    assert_eq!(status.subscribed_count, 0);
}

#[test]
fn restart_replaces_the_session_and_clears_the_store() {
    let transport = ScriptedTransport::new();
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    let first = contract("AAPL", OptionType::Call, 190.0);
    manager.start(&[first.clone()]);
    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Streaming));
    transport.push(&data_frame(&first.encode_wire(), 2.0));
    assert!(wait_until(WAIT, || manager.get_status().quote_count == 1));

    let second = contract("MSFT", OptionType::Put, 400.0);
    assert!(manager.start(&[second.clone()]));
    assert_eq!(manager.get_status().quote_count, 0);
    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Streaming));

    assert_eq!(transport.connects(), 2);
    assert_eq!(transport.closes(), 1);
    let subscriptions = transport.subscriptions();
    assert_eq!(subscriptions[1].0, vec![second.encode_wire()]);
}

#[test]
fn hanging_close_does_not_block_stop() {
    let transport = ScriptedTransport::new();
    transport.hang_close(Duration::from_secs(3));
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    manager.start(&[contract("AAPL", OptionType::Call, 190.0)]);
    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Streaming));

    let started = Instant::now();
    assert!(manager.stop());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(manager.get_status().state, SessionState::Stopped);
}

#[test]
fn hanging_connect_does_not_block_stop_or_restart() {
    let transport = ScriptedTransport::new();
    transport.hang_connect(Some(Duration::from_secs(3)));
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    manager.start(&[contract("AAPL", OptionType::Call, 190.0)]);
    assert!(wait_until(WAIT, || transport.connects() == 1));

    let started = Instant::now();
    assert!(manager.stop());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(manager.get_status().state, SessionState::Stopped);

    manager.start(&[contract("AAPL", OptionType::Put, 190.0)]);
    assert!(wait_until(WAIT, || transport.connects() == 2));
    transport.hang_connect(None);
    let started = Instant::now();
    assert!(manager.start(&[contract("MSFT", OptionType::Call, 400.0)]));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Streaming));

    let subscriptions = transport.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].0, vec!["MSFT  240621C00400000".to_string()]);
}

#[test]
fn late_subscribe_result_of_a_stopped_session_is_closed() {
    let transport = ScriptedTransport::new();
    transport.hang_subscribe(Some(Duration::from_secs(2)));
    let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
    manager.start(&[contract("AAPL", OptionType::Call, 190.0)]);
    assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Subscribing));

    let started = Instant::now();
    assert!(manager.stop());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.closes(), 0);

    assert!(wait_until(WAIT, || transport.closes() == 1));
    let status = manager.get_status();
    assert_eq!(status.state, SessionState::Stopped);
    assert_eq!(status.subscribed_count, 0);
}

#[test]
fn dropping_the_manager_closes_the_transport() {
    let transport = ScriptedTransport::new();
    {
        let manager = StreamingManager::new(transport.clone(), quiet_config()).unwrap();
        manager.start(&[contract("AAPL", OptionType::Call, 190.0)]);
        assert!(wait_until(WAIT, || manager.get_status().state == SessionState::Streaming));
    }
    assert_eq!(transport.closes(), 1);
    assert!(!transport.push(&StreamFrame::heartbeat(1).to_json().unwrap()));
}
