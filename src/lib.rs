#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Seatsmith: seat-level input event processing
//!
//! This crate is the per-device event processing core between the kernel's
//! evdev character devices and a compositor's input handling. It decodes raw
//! evdev reports, coalesces the per-frame field updates into single semantic
//! events at `SYN_REPORT` boundaries, multiplexes multi-touch slots onto a
//! stable pool of seat-wide touch identifiers, applies absolute-coordinate
//! calibration and pointer acceleration, and delivers the result to a
//! [`InputSink`](crate::backend::input::InputSink) implemented by the caller.
//!
//! ## Structure of the crate
//!
//! [`backend::evdev`] contains the device lifecycle and the event pipeline:
//! opening devices through a privileged [`Session`](crate::backend::session::Session)
//! broker, classifying their capabilities, draining their queues and turning
//! raw events into [`InputEvent`](crate::backend::input::InputEvent)s.
//! [`seat`] owns the seat-wide touch slot allocator shared by all devices of
//! one seat. [`utils`] provides the monotonic clock and the small affine
//! matrix type used by the calibration pipeline.
//!
//! ## The event loop
//!
//! Seatsmith is built around the same callback-oriented model as [`calloop`]:
//! all processing happens on one event-loop thread, callbacks run to
//! completion and no internal locking is required.
//! [`EvdevContext`](crate::backend::evdev::EvdevContext) implements
//! [`calloop::EventSource`], so it can be inserted into a calloop event loop
//! directly; hosts with their own readiness loop can instead watch the device
//! file descriptors themselves and call
//! [`EvdevContext::dispatch`](crate::backend::evdev::EvdevContext::dispatch)
//! when any of them becomes readable.

pub mod backend;
pub mod seat;
pub mod utils;
