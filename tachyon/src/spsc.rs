//! Core SPSC (Single-Producer Single-Consumer) queue primitives.
//!
//! This module holds the ring buffer algorithm and its memory layout. The
//! safe, role-splitting front end lives in [`crate::sync::spsc`].

pub(crate) mod ring;
