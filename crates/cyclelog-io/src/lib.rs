//! Reference sinks and sources for cyclelog.
//!
//! The core crate only defines the [`Sink`] and [`Source`] contracts; this
//! crate provides adapters that make a record-then-replay run possible
//! outside of a test.
//!
//! # Modules
//!
//! - [`jsonl`] -- [`JsonLinesSink`] and [`JsonLinesSource`]: one header
//!   line followed by one snapshot per line.
//! - [`channel`] -- [`ChannelSink`], which forwards snapshots to an async
//!   consumer over a tokio channel.
//!
//! [`Sink`]: cyclelog_core::dataflow::Sink
//! [`Source`]: cyclelog_core::dataflow::Source
//! [`JsonLinesSink`]: jsonl::JsonLinesSink
//! [`JsonLinesSource`]: jsonl::JsonLinesSource
//! [`ChannelSink`]: channel::ChannelSink

pub mod channel;
pub mod jsonl;

pub use channel::ChannelSink;
pub use jsonl::{JsonLinesSink, JsonLinesSource, SCHEMA_VERSION};
