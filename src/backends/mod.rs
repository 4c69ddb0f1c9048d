// SPDX-License-Identifier: GPL-3.0-only

//! Host-facing backends
//!
//! Everything that touches the platform lives here:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Controller / Pipelines / Plugins      │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌─────────────┐    ┌──────────────────┐   │
//! │  │   Memory    │    │     Camera       │   │
//! │  │  (procfs)   │    │ (native session) │   │
//! │  └─────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Native capture contract, session state machine, still-image backend
//! - [`memory`]: Process memory pressure monitor

pub mod camera;
pub mod memory;
