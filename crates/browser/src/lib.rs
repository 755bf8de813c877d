//! Browser automation execution engine.
//!
//! Drives a live browser tab through an external automation server spoken
//! to over newline-delimited JSON-RPC on the server subprocess's standard
//! streams. The pieces, leaf-first: [`supervisor`] owns the subprocess,
//! [`frame`]/[`rpc`] carry correlated calls over its streams, [`resolver`]
//! turns semantic actions into tool calls with layered selector fallback
//! backed by the persistent selector memory, and [`facade`] composes it all
//! behind one uniform surface. [`blocking`] adapts the async core for
//! synchronous callers.

pub mod action;
pub mod blocking;
pub mod facade;
pub mod frame;
pub mod resolver;
pub mod rpc;
pub mod screenshot;
pub mod snapshot;
pub mod supervisor;
pub mod vision;

pub use action::{Action, ActionKind, ActionOutcome, OutcomeStatus};
pub use blocking::BlockingBrowser;
pub use facade::{Browser, ScrollDirection};
pub use rpc::{McpToolClient, RpcTransport, ToolClient};
pub use supervisor::ProcessSupervisor;
pub use vision::{OpenAiSuggester, SelectorSuggester};
