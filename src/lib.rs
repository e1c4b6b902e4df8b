//! ts-plug: run a local process as its own node on an overlay network.
//!
//! The supervisor starts a command, joins the overlay under a hostname, and
//! forwards inbound HTTP, HTTPS and DNS traffic to the command on localhost.
//! Proxied HTTP requests carry the caller's overlay identity in
//! `Tailscale-User-*` headers. The reverse direction (`unplug`) exposes a
//! remote overlay service on a local port.
//!
//! # Architecture
//!
//! - **Supervisor**: Child process start, output relay and termination
//! - **Overlay**: Provider abstraction over the overlay daemon's local API
//! - **Proxy**: Per-request HTTP reverse proxy with upgrade tunneling
//! - **Listeners**: HTTP, HTTPS, public ingress and DNS forwarding tasks
//! - **Lifecycle**: One-shot shutdown signal shared by every task
//! - **Config**: Hierarchical TOML configuration merged with CLI flags

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod listeners;
pub mod orchestrator;
pub mod overlay;
pub mod plug;
pub mod proxy;
pub mod supervisor;
pub mod telemetry;
pub mod unplug;
