//! Publish/subscribe over any `transport::Transport`: `Publisher` binds and
//! broadcasts, `Subscriber` connects and filters incoming broadcasts
//! through its own [`Bus`] subscription index.
//!
//! Generalizes a `tokio::sync::broadcast`-backed in-memory shape so the
//! in-process path is just the `INPROC` transport variant rather than a
//! separate code path — the broadcast fan-out behavior it modeled is now
//! `Transport::send`'s multicast on a server-role endpoint.

use std::sync::Arc;

use reactor::config::{Address, TransportKind};
use reactor::error::Error;
use transport::{ConnectCallback, ReceiveCallback, Transport};
use wire::Broadcast;

use crate::router::{Bus, Stats, SubscriptionFn};

/// Sent once by a subscriber immediately after connecting over UDP, so the
/// publisher's peer table (which a `UdpTransport` only ever populates from
/// an inbound datagram) learns the subscriber's address before the first
/// `publish` call. Kept as a bare 9-byte presence ping, never decoded by
/// either side.
pub const UDP_SUBSCRIBE_SENTINEL: &[u8] = b"RCOMM-SUB";

/// A bound broadcast source. Every `publish` fans out to every currently
/// connected subscriber.
pub struct Publisher {
    transport: Arc<Transport>,
}

impl Publisher {
    pub async fn bind(address: &Address) -> Result<Self, Error> {
        let on_receive: ReceiveCallback = Arc::new(|_payload, _peer| {
            // UDP subscribers' presence pings land here purely so the
            // transport layer learns their address; the publisher has
            // nothing to do with the bytes themselves.
        });
        let transport = Arc::new(Transport::listen(address, on_receive).await?);
        Ok(Self { transport })
    }

    pub fn publish(&self, topic: impl Into<String>, data: Vec<u8>) -> Result<(), Error> {
        let broadcast = Broadcast { topic: topic.into(), data };
        let bytes = wire::encode_broadcast(&broadcast)?;
        self.transport.send(&bytes)
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

/// A connected subscriber. Incoming broadcasts are matched against
/// whatever patterns have been registered via [`Subscriber::subscribe`]
/// using the same exact-match-then-wildcard rule the message bus uses
/// everywhere else.
pub struct Subscriber {
    transport: Arc<Transport>,
    bus: Arc<Bus>,
}

impl Subscriber {
    pub async fn connect(address: &Address, timeout_ms: u64) -> Result<Self, Error> {
        let bus = Arc::new(Bus::new());
        let bus_for_cb = bus.clone();
        let on_receive: ReceiveCallback = Arc::new(move |payload, _peer| {
            match wire::decode_broadcast(payload) {
                Ok(b) => {
                    bus_for_cb.dispatch_broadcast(&b.topic, &b.data);
                }
                Err(e) => tracing::debug!(error = %e, "subscriber received an undecodable broadcast"),
            }
        });
        let on_connect: ConnectCallback = Arc::new(|_| {});

        let transport = Arc::new(Transport::connect(address, timeout_ms, on_connect, on_receive).await?);

        if address.kind == TransportKind::Udp {
            transport.send(UDP_SUBSCRIBE_SENTINEL)?;
        }

        Ok(Self { transport, bus })
    }

    /// Register interest in `pattern` — an exact topic, or a `prefix*`
    /// wildcard. Re-registering an existing pattern replaces its callback.
    pub fn subscribe(&self, pattern: impl Into<String>, callback: SubscriptionFn) {
        self.bus.subscribe(pattern, callback);
    }

    pub fn unsubscribe(&self, pattern: &str) -> bool {
        self.bus.unsubscribe(pattern)
    }

    pub fn stats(&self) -> Stats {
        self.bus.snapshot()
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn exact_topic_reaches_subscriber() {
        let addr = Address::parse("inproc://pubsub-test-exact").unwrap();
        let publisher = Publisher::bind(&addr).await.unwrap();
        let subscriber = Subscriber::connect(&addr, 1_000).await.unwrap();

        let hits = StdArc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        subscriber.subscribe("weather.oslo", Arc::new(move |payload| {
            assert_eq!(payload, b"rain");
            hits_cb.fetch_add(1, Ordering::SeqCst);
        }));

        publisher.publish("weather.oslo", b"rain".to_vec()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        publisher.close();
        subscriber.close();
    }

    #[tokio::test]
    async fn wildcard_subscription_matches_prefixed_topics() {
        let addr = Address::parse("inproc://pubsub-test-wildcard").unwrap();
        let publisher = Publisher::bind(&addr).await.unwrap();
        let subscriber = Subscriber::connect(&addr, 1_000).await.unwrap();

        let hits = StdArc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        subscriber.subscribe("weather.*", Arc::new(move |_payload| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
        }));

        publisher.publish("weather.bergen", b"wind".to_vec()).unwrap();
        publisher.publish("traffic.bergen", b"jam".to_vec()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        publisher.close();
        subscriber.close();
    }

    #[tokio::test]
    async fn unsubscribed_topic_is_not_delivered() {
        let addr = Address::parse("inproc://pubsub-test-unsub").unwrap();
        let publisher = Publisher::bind(&addr).await.unwrap();
        let subscriber = Subscriber::connect(&addr, 1_000).await.unwrap();

        let hits = StdArc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        subscriber.subscribe("news.sports", Arc::new(move |_| { hits_cb.fetch_add(1, Ordering::SeqCst); }));
        assert!(subscriber.unsubscribe("news.sports"));

        publisher.publish("news.sports", b"goal".to_vec()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        publisher.close();
        subscriber.close();
    }
}
