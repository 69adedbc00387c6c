mod common;

use actor_mesh::actor::{ActorKey, NodeId};
use actor_mesh::channel::NetChannel;
use actor_mesh::error::ErrorCode;
use actor_mesh::message::{Body, Envelope, MessageSerializer, OperationHeader, OperationType};
use actor_mesh::pipeline::{HandlerConfig, PipelineBuilder};
use actor_mesh::transport::{memory_pipe, Inbound, MemoryLink, TransportChannel};
use actor_mesh::RuntimeError;
use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type Channel = Arc<NetChannel<CounterProtocol>>;

fn client(link: Arc<MemoryLink>, inbound: Inbound, send_timeout: Duration) -> Channel {
    NetChannel::spawn(Some(NodeId(2)), link, inbound, serializer(), send_timeout, |_, builder| builder)
}

/// Client and server channels; the server dispatches to `handlers`.
fn connected(handlers: HandlerConfig<CounterProtocol>, send_timeout: Duration) -> (Channel, Channel) {
    let ((a, a_in), (b, b_in)) = memory_pipe();
    let server = NetChannel::spawn(Some(NodeId(1)), b, b_in, serializer(), send_timeout, |_, builder: PipelineBuilder<_>| {
        builder.use_dispatcher(handlers, true)
    });
    (client(a, a_in, send_timeout), server)
}

fn counter_handlers() -> HandlerConfig<CounterProtocol> {
    HandlerConfig::new()
        .handle_request(|Sleep(ms): Sleep, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Count(ms))
        })
        .handle_request_sync(|Reject(reason): Reject, _ctx| -> actor_mesh::Result<Count> {
            Err(RuntimeError::processing(REJECTED, reason))
        })
        .handle_request_sync(|_: Explode, _ctx| -> actor_mesh::Result<Count> {
            Err(RuntimeError::UnexpectedMessage("exploded".to_string()))
        })
}

/// Reads the next envelope the client wrote to a raw peer.
async fn next_envelope(inbound: &mut Inbound) -> Envelope<CounterProtocol> {
    let bytes = inbound.recv().await.expect("peer stream ended");
    serializer().deserialize(&bytes).expect("undecodable envelope")
}

fn reply(link: &MemoryLink, request_id: Uuid, body: Body<CounterProtocol>) {
    let envelope = Envelope {
        header: OperationHeader::reply(request_id, request_id),
        target: None,
        body,
    };
    link.send(serializer().serialize(&envelope).unwrap()).unwrap();
}

#[tokio::test]
async fn test_replies_resolve_their_own_requests() {
    let (client, _server) = connected(counter_handlers(), Duration::from_secs(2));

    let target = Some(ActorKey::new(NodeId(1), 1));
    let (slow, fast) = tokio::join!(
        client.send_request(target, Sleep(80).into()),
        client.send_request(target, Sleep(5).into()),
    );
    assert_eq!(slow.unwrap(), CounterProtocol::from(Count(80)));
    assert_eq!(fast.unwrap(), CounterProtocol::from(Count(5)));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_unmatched_reply_is_dropped() {
    let ((a, a_in), (raw, mut raw_in)) = memory_pipe();
    let client = client(a, a_in, Duration::from_secs(2));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.send_request(None, GetCount.into()).await }
    });
    let request = next_envelope(&mut raw_in).await;
    assert_eq!(request.header.op_type, OperationType::Request);
    let request_id = request.header.request_id.expect("request without id");

    reply(&raw, Uuid::new_v4(), Body::Message(Count(666).into()));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(client.pending_count(), 1);
    assert!(!pending.is_finished());

    reply(&raw, request_id, Body::Message(Count(1).into()));
    assert_eq!(pending.await.unwrap().unwrap(), CounterProtocol::from(Count(1)));

    // A second reply for the same id finds nothing to complete.
    reply(&raw, request_id, Body::Message(Count(2).into()));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_request_times_out_and_forgets_pending_entry() {
    let ((a, a_in), (_raw, mut raw_in)) = memory_pipe();
    let client = client(a, a_in, Duration::from_millis(50));

    let err = client.send_request(None, GetCount.into()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Timeout { after, .. } if after == Duration::from_millis(50)));
    assert_eq!(client.pending_count(), 0);
    assert!(raw_in.recv().await.is_some(), "request should still have been sent");
}

#[tokio::test]
async fn test_error_replies_become_processing_errors() {
    let (client, _server) = connected(counter_handlers(), Duration::from_secs(2));

    match client.send_request(None, Reject("not allowed".into()).into()).await {
        Err(RuntimeError::Processing { code, description }) => {
            assert_eq!(code, REJECTED);
            assert_eq!(description, "not allowed");
        }
        other => panic!("expected processing error, got {other:?}"),
    }

    // Unexpected failures are reported with the generic code.
    let err = client.send_request(None, Explode.into()).await.unwrap_err();
    assert!(err.is_code(ErrorCode::Unknown), "{err:?}");

    let err = client.send_request(None, Count(1).into()).await.unwrap_err();
    assert!(err.is_code(ErrorCode::DispatcherFuncNotFound), "{err:?}");
}

#[tokio::test]
async fn test_panicking_handler_is_answered_with_error_reply() {
    let handlers = HandlerConfig::new().handle_request_sync(|_: GetCount, _ctx| -> actor_mesh::Result<Count> {
        panic!("counter exploded")
    });
    let (client, server) = connected(handlers, Duration::from_millis(300));

    let err = client.send_request(None, GetCount.into()).await.unwrap_err();
    assert!(err.is_code(ErrorCode::Unknown), "{err:?}");

    // The server keeps serving after the panic.
    assert!(server.is_connected());
    let err = client.send_request(None, GetCount.into()).await.unwrap_err();
    assert!(err.is_code(ErrorCode::Unknown), "{err:?}");
}

#[tokio::test]
async fn test_request_without_reply_is_left_unanswered() {
    let touched = Arc::new(Mutex::new(0));
    let handlers = HandlerConfig::new().handle_message_sync({
        let touched = touched.clone();
        move |_: Touch, _ctx| {
            *touched.lock() += 1;
            Ok(())
        }
    });
    let (client, _server) = connected(handlers, Duration::from_millis(100));

    client.send_one_way(None, Touch.into()).expect("one-way send failed");
    let err = client.send_request(None, Touch.into()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Timeout { .. }));
    assert_eq!(*touched.lock(), 2);
}

#[tokio::test]
async fn test_dispose_fails_pending_requests() {
    let ((a, a_in), (_raw, mut raw_in)) = memory_pipe();
    let client = client(a, a_in, Duration::from_secs(5));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.send_request(None, GetCount.into()).await }
    });
    next_envelope(&mut raw_in).await;

    client.dispose();
    assert!(matches!(pending.await.unwrap(), Err(RuntimeError::ChannelClosed)));
    assert!(!client.is_connected());
    assert_eq!(client.pending_count(), 0);
    assert!(raw_in.recv().await.is_none(), "peer should observe the disconnect");
    assert!(matches!(
        client.send_request(None, GetCount.into()).await,
        Err(RuntimeError::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_peer_disconnect_closes_channel() {
    let ((a, a_in), (raw, mut raw_in)) = memory_pipe();
    let client = client(a, a_in, Duration::from_secs(5));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.send_request(None, GetCount.into()).await }
    });
    next_envelope(&mut raw_in).await;

    raw.close();
    tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .expect("channel should close when the peer goes away");
    assert!(matches!(pending.await.unwrap(), Err(RuntimeError::ChannelClosed)));
}
