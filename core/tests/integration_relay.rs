// Integration test: three nodes relaying over two pipes
//
//   A <--BLE--> B <--BLE--> C
//
// A and C are not neighbours. B advertises its routes, A learns that C is
// two hops away via B, and messages from A reach C through B. When the B-C
// link is down, B parks the message and flushes it once the link is back.

mod common;

use common::{connected_pair, radio_config};
use meshpipe_core::pipe::Pipe;
use meshpipe_core::routing::{RoutingConfig, RoutingTable};
use meshpipe_core::store::{MessageStore, MessageStoreConfig};
use meshpipe_core::{DispatchOutcome, Dispatcher, NetworkMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_stream::StreamExt;

struct Node {
    dispatcher: Arc<Dispatcher>,
}

impl Node {
    fn new(id: &str) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(
                Arc::new(RoutingTable::new(RoutingConfig::new(id))),
                Arc::new(MessageStore::new(MessageStoreConfig::default())),
            )),
        }
    }

    fn attach(&self, neighbor: &str, pipe: Pipe) {
        self.dispatcher.register_pipe(neighbor, pipe);
        assert!(self.dispatcher.start_receiving(neighbor));
    }
}

struct Line {
    a: Node,
    b: Node,
    c: Node,
    b_to_c: Pipe,
}

async fn line() -> Line {
    let (a_b, b_a, _, _) = connected_pair("a->b", "b->a", radio_config(256)).await;
    let (b_c, c_b, _, _) = connected_pair("b->c", "c->b", radio_config(256)).await;

    let a = Node::new("A");
    let b = Node::new("B");
    let c = Node::new("C");
    a.attach("B", a_b);
    b.attach("A", b_a);
    b.attach("C", b_c.clone());
    c.attach("B", c_b);

    Line { a, b, c, b_to_c: b_c }
}

async fn wait_for_route(node: &Node, destination: &str) {
    timeout(Duration::from_secs(2), async {
        while node.dispatcher.routing().get_next_hop(destination).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("route learned in time");
}

#[tokio::test]
async fn test_message_relayed_across_two_hops() {
    meshpipe_core::logging::init_tracing("meshpipe_core=debug");
    let net = line().await;
    let mut c_inbox = net.c.dispatcher.local_messages();

    assert_eq!(net.b.dispatcher.advertise_routes().await.unwrap(), 2);
    wait_for_route(&net.a, "C").await;
    wait_for_route(&net.c, "A").await;

    let route = net.a.dispatcher.routing().get_route("C").unwrap();
    assert_eq!(route.next_hop, "B");
    assert_eq!(route.distance, 2);

    let message = NetworkMessage::new("A", "C", b"hello over two hops".to_vec());
    let outcome = net.a.dispatcher.dispatch(message.clone()).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Sent {
            next_hop: "B".into(),
            attempts: 1
        }
    );

    let received = timeout(Duration::from_secs(2), c_inbox.next())
        .await
        .expect("relayed in time")
        .unwrap();
    assert_eq!(received.id, message.id);
    assert_eq!(received.payload, message.payload);
    assert_eq!(received.ttl, message.ttl - 1, "one relay hop");
}

#[tokio::test]
async fn test_relay_parks_message_until_link_returns() {
    let net = line().await;
    let mut c_inbox = net.c.dispatcher.local_messages();
    net.b.dispatcher.advertise_routes().await.unwrap();
    wait_for_route(&net.a, "C").await;

    net.b_to_c.disconnect(false).await.unwrap();

    let message = NetworkMessage::new("A", "C", b"store me".to_vec());
    net.a.dispatcher.dispatch(message.clone()).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while net.b.dispatcher.store().get(&message.id).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("parked at B");

    net.b_to_c.connect(true).await.unwrap();
    assert_eq!(net.b.dispatcher.flush_pending().await, 1);
    assert!(net.b.dispatcher.store().get(&message.id).unwrap().delivered);

    let received = timeout(Duration::from_secs(2), c_inbox.next())
        .await
        .expect("flushed in time")
        .unwrap();
    assert_eq!(received.id, message.id);
}

#[tokio::test]
async fn test_lost_neighbour_poisons_routes() {
    let net = line().await;
    net.b.dispatcher.advertise_routes().await.unwrap();
    wait_for_route(&net.a, "C").await;

    assert!(net.a.dispatcher.unregister_pipe("B").is_some());
    assert_eq!(net.a.dispatcher.routing().get_next_hop("C"), None);

    let outcome = net
        .a
        .dispatcher
        .dispatch(NetworkMessage::new("A", "C", b"nowhere to go".to_vec()))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Stored);
    assert_eq!(net.a.dispatcher.store().len(), 1);
}
