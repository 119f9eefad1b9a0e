//! The message bus: routing (`router`), request/response RPC (`rpc`), and
//! publish/subscribe (`pubsub`), all built on `transport::Transport` and
//! `wire`'s frame codec.

pub mod pubsub;
pub mod router;
pub mod rpc;

pub use pubsub::{Publisher, Subscriber, UDP_SUBSCRIBE_SENTINEL};
pub use router::{Bus, HandlerFn, PendingCallback, PendingOutcome, ReplyToken, Stats, SubscriptionFn};
pub use rpc::{CallError, RpcClient, RpcServer};
