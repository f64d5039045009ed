//! # mobiwd-core
//!
//! Core library of a WebDriver driver for iOS native apps and the web content
//! they host.
//!
//! Every request is routed either straight to the in-device UI-test agent or
//! through a translation layer that talks to the content-debugging agent.
//! That layer tracks the active context, hands out stable element handles
//! that never alias backend ids, and hides the agents' transient failures
//! behind bounded waits and retries.
//!
//! ## Modules
//!
//! - [`session`] - One automated run: bootstrap, command handling, teardown
//! - [`router`] - Classifies commands as driver-local, native proxy or content
//! - [`context`] - Active context state machine and the content-debugging link
//! - [`commands`] - Content verb translator and its guarding wrapper
//! - [`registry`] - Public element handles over backend handles
//! - [`gesture`] - Sequential touch gesture batches
//! - [`wait`] - Bounded polling and retry
//! - [`alert`] - Automatic alert accept/dismiss policy
//! - [`lifecycle`] - Device preparation and agent startup
//! - [`native`] / [`remote`] / [`device`] - Contracts of the external agents
//!   and device tooling, with the HTTP and `simctl` implementations
//! - [`caps`] / [`config`] - Capabilities and persisted driver settings
//! - [`error`] - Protocol error taxonomy
//!
//! ## External Dependencies
//!
//! Driving simulators requires **Xcode** (`xcrun simctl`). The native agent
//! must be reachable on the forwarded proxy port.

pub mod alert;
pub mod caps;
pub mod commands;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod gesture;
pub mod lifecycle;
pub mod native;
pub mod registry;
pub mod remote;
pub mod router;
pub mod session;
pub mod wait;
