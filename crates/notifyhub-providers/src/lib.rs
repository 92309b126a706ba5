//! Destination registry, URL parser, and the concrete provider family
//! (C2 + C3). [`ProviderRegistry::with_defaults`] wires every scheme this
//! engine understands to its factory; [`ProviderRegistry::build`] is the
//! whole of `Add`'s URL-to-destination half.
//!
//! Provider families live in one module each, grouped by how they deliver
//! rather than by scheme count: webhook-shaped chat providers share one
//! JSON-POST helper, cloud-bus/push/some-incident providers share the
//! webhook-proxy envelope (§6, §9), SMTP and Twilio speak their own wire
//! protocols directly.

mod chat;
mod cloudbus;
mod common;
mod email;
mod incident;
mod proxy;
mod push;
pub mod registry;
mod stub;
pub mod url;
mod voice;

pub use registry::{classify_http_status, classify_transport_error, Destination, EffectiveRequest, Provider, ProviderFactory, ProviderRegistry};
pub use url::ParsedUrl;
