//! Cycle orchestration, console capture, and record/replay contracts for
//! cyclelog.
//!
//! A host control loop wraps every iteration in
//! [`CycleLogger::begin_cycle`] and [`CycleLogger::end_cycle`]. In between,
//! components pass through the logger, which writes them to the cycle's
//! table while recording and restores them from a [`Source`] while
//! replaying. Each finished cycle becomes a snapshot handed to every
//! registered [`Sink`].
//!
//! # Modules
//!
//! - [`config`] -- [`LoggerConfig`] loaded from `cyclelog.yaml`.
//! - [`console`] -- [`ConsoleCapture`] and its tee writers.
//! - [`dataflow`] -- [`Sink`] and [`Source`] contracts, with in-memory
//!   implementations.
//! - [`inputs`] -- The [`Loggable`] contract and declarative [`FieldSet`]s.
//! - [`logger`] -- The [`CycleLogger`] orchestrator.
//! - [`timer`] -- [`CycleTimer`], a stopwatch that replays identically.
//!
//! [`LoggerConfig`]: config::LoggerConfig
//! [`ConsoleCapture`]: console::ConsoleCapture
//! [`Sink`]: dataflow::Sink
//! [`Source`]: dataflow::Source
//! [`Loggable`]: inputs::Loggable
//! [`FieldSet`]: inputs::FieldSet
//! [`CycleLogger`]: logger::CycleLogger
//! [`CycleLogger::begin_cycle`]: logger::CycleLogger::begin_cycle
//! [`CycleLogger::end_cycle`]: logger::CycleLogger::end_cycle
//! [`CycleTimer`]: timer::CycleTimer

pub mod config;
pub mod console;
pub mod dataflow;
pub mod inputs;
pub mod logger;
pub mod timer;
