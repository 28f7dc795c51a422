//! Closed-loop control.

pub mod adaptive;
