//! Webhook delivery: signing, transport, retrying engine and dispatcher.

pub mod delivery;
pub mod dispatcher;
pub mod signature;
pub mod store;
pub mod transport;

pub use delivery::{DeliveryEngine, DeliverySettings, SecretSource, WebhookSecret};
pub use dispatcher::WebhookDispatcher;
pub use store::{DeliveryStore, WebhookStore};
pub use transport::{
    HttpTransport, OutboundRequest, ReqwestTransport, TransportError, TransportResponse,
};
