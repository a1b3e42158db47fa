// Integration tests for message routing and session termination
//
// These drive a Client over the fake transport, the same way a worker
// connection would, and check the end-to-end lifecycle of pending requests.

mod common;

use common::{WAIT, init_tracing, scripted};
use serde_json::json;
use workerlink::testing::FakeTransportBuilder;
use workerlink::{Client, ClientConfig, CorrelationId, Envelope, Error, TerminationReason};

#[tokio::test]
async fn continue_until_handler_ends_session() {
	init_tracing();
	let (parts, controller) = FakeTransportBuilder::new().build();
	let client = Client::connect(parts, ClientConfig::default());

	let (handler, mut probe) = scripted();
	let x = CorrelationId::new();
	let handle = client
		.send_request(x, Envelope::new(x, json!({"kind": "compile"})), handler)
		.await
		.unwrap();
	assert_eq!(controller.sent_ids(), vec![x]);

	controller.inject(Envelope::new(x, json!({"progress": 50})));
	assert_eq!(probe.next_seen().await["progress"], 50);
	assert!(client.dispatcher().table().contains(&x));
	assert!(!handle.is_done());

	controller.inject(Envelope::new(x, json!({"done": true})));
	let reason = handle.wait_timeout(WAIT).await.unwrap();

	assert_eq!(reason, TerminationReason::Completed);
	assert!(!client.dispatcher().table().contains(&x));
	assert_eq!(probe.terminated(), 1);
}

#[tokio::test]
async fn unmatched_message_leaves_other_sessions_alone() {
	init_tracing();
	let (parts, controller) = FakeTransportBuilder::new().build();
	let client = Client::connect(parts, ClientConfig::default());

	let (handler, mut probe) = scripted();
	let x = CorrelationId::new();
	let handle = client.send_request(x, Envelope::new(x, json!({})), handler).await.unwrap();

	// stale reply for an id nobody registered
	controller.inject(Envelope::new(CorrelationId::new(), json!({"done": true})));
	controller.inject(Envelope::uncorrelated(json!({"notice": "worker busy"})));
	controller.inject(Envelope::new(x, json!({"step": 1})));

	assert_eq!(probe.next_seen().await["step"], 1);
	assert_eq!(client.pending_count(), 1);
	assert!(!handle.is_done());
	assert!(client.is_connected());
}

#[tokio::test]
async fn channel_close_terminates_every_outstanding_request() {
	init_tracing();
	let (parts, controller) = FakeTransportBuilder::new().build();
	let client = Client::connect(parts, ClientConfig::default());

	let mut sessions = Vec::new();
	for _ in 0..3 {
		let (handler, probe) = scripted();
		let id = CorrelationId::new();
		let handle = client.send_request(id, Envelope::new(id, json!({})), handler).await.unwrap();
		sessions.push((handle, probe));
	}
	assert_eq!(client.pending_count(), 3);

	controller.close();

	for (handle, probe) in &sessions {
		assert_eq!(handle.wait_timeout(WAIT).await.unwrap(), TerminationReason::ChannelClosed);
		assert_eq!(probe.terminated(), 1);
	}
	assert_eq!(client.pending_count(), 0);
	assert!(!client.is_connected());
}

#[tokio::test]
async fn handler_failure_completes_request_and_frees_id() {
	init_tracing();
	let (parts, controller) = FakeTransportBuilder::new().build();
	let client = Client::connect(parts, ClientConfig::default());

	let (handler, probe) = scripted();
	let x = CorrelationId::new();
	let handle = client.send_request(x, Envelope::new(x, json!({})), handler).await.unwrap();

	controller.inject(Envelope::new(x, json!({"fail": "unknown target"})));
	let reason = handle.wait_timeout(WAIT).await.unwrap();

	match reason {
		TerminationReason::HandlerFailed { message } => assert!(message.contains("unknown target")),
		other => panic!("Expected HandlerFailed, got {other:?}"),
	}
	assert_eq!(probe.terminated(), 1);

	let (handler, _probe) = scripted();
	client.send_request(x, Envelope::new(x, json!({})), handler).await.unwrap();
	assert_eq!(client.pending_count(), 1);
}

#[tokio::test]
async fn handler_error_surfaces_to_direct_dispatch_caller() {
	init_tracing();
	let (parts, _controller) = FakeTransportBuilder::new().build();
	let client = Client::connect(parts, ClientConfig::default());

	let (handler, probe) = scripted();
	let x = CorrelationId::new();
	let handle = client.register(x, handler).unwrap();

	let err = client
		.dispatcher()
		.on_message(Envelope::new(x, json!({"fail": "bad frame"})))
		.unwrap_err();

	// cleanup already happened by the time the error is visible
	assert!(handle.is_done());
	assert_eq!(probe.terminated(), 1);
	assert!(matches!(err, Error::Handler { id, .. } if id == x));
	assert!(err.to_string().contains("bad frame"));
}

#[tokio::test]
async fn handler_panic_is_contained_to_its_session() {
	init_tracing();
	let (parts, controller) = FakeTransportBuilder::new().build();
	let client = Client::connect(parts, ClientConfig::default());

	let (panicking, _) = scripted();
	let (healthy, mut healthy_probe) = scripted();
	let x = CorrelationId::new();
	let y = CorrelationId::new();
	let bad = client.send_request(x, Envelope::new(x, json!({})), panicking).await.unwrap();
	let good = client.send_request(y, Envelope::new(y, json!({})), healthy).await.unwrap();

	controller.inject(Envelope::new(x, json!({"panic": true})));
	assert!(matches!(
		bad.wait_timeout(WAIT).await.unwrap(),
		TerminationReason::HandlerFailed { .. }
	));

	// event loop survived the panic
	controller.inject(Envelope::new(y, json!({"done": true})));
	assert_eq!(healthy_probe.next_seen().await["done"], true);
	assert_eq!(good.wait_timeout(WAIT).await.unwrap(), TerminationReason::Completed);
}

#[tokio::test]
async fn messages_arrive_in_order_and_stop_after_termination() {
	init_tracing();
	let (parts, controller) = FakeTransportBuilder::new().build();
	let client = Client::connect(parts, ClientConfig::default());

	let (handler, mut probe) = scripted();
	let x = CorrelationId::new();
	let handle = client.send_request(x, Envelope::new(x, json!({})), handler).await.unwrap();

	for seq in 0..20 {
		controller.inject(Envelope::new(x, json!({"seq": seq})));
	}
	controller.inject(Envelope::new(x, json!({"seq": 20, "done": true})));
	controller.inject(Envelope::new(x, json!({"seq": 21})));

	handle.wait_timeout(WAIT).await.unwrap();
	for expected in 0..=20 {
		assert_eq!(probe.next_seen().await["seq"], expected);
	}

	// the trailing message went through the loop but found no session
	client.disconnect().await.unwrap();
	controller.end_stream();
	tokio::time::timeout(WAIT, client.closed()).await.unwrap();
	assert!(probe.seen.try_recv().is_err());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
	init_tracing();
	let (parts, controller) = FakeTransportBuilder::new().build();
	let client = Client::connect(parts, ClientConfig::default());

	let x = CorrelationId::new();
	let (first, _) = scripted();
	let (second, _) = scripted();
	let original = client.send_request(x, Envelope::new(x, json!({})), first).await.unwrap();

	let err = client
		.send_request(x, Envelope::new(x, json!({})), second)
		.await
		.unwrap_err();

	assert!(matches!(err, Error::DuplicateCorrelation { id } if id == x));
	assert_eq!(controller.sent_ids(), vec![x]);
	assert!(!original.is_done());
	assert_eq!(client.pending_count(), 1);
}
