//! Display bridge to the Android hwcomposer HAL
//!
//! This library connects a windowing toolkit's rendering pipeline to the
//! hardware composition engine of an Android-based device: it opens the
//! composer, negotiates screen geometry and refresh rate, creates the
//! native rendering surface, and drives the present/vsync loop that puts
//! rendered buffers on screen. Four incompatible generations of the
//! composer API are handled behind one backend abstraction.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Windowing toolkit / renderer                │
//! └─────────────────────────────────────────────────────────────┘
//!           │ swap / sleep / request_update
//! ┌─────────────────────────────────────────────────────────────┐
//! │  HwcContext ── DisplayBackend (v0 / v1.0 / v1.1+ / v2.0)    │
//! │  ┌────────────┐ ┌────────────┐ ┌───────────┐ ┌───────────┐  │
//! │  │ SwapSlot   │ │Composition │ │ Vsync/idle│ │  Power/   │  │
//! │  │ (handoff)  │ │  engine    │ │ scheduler │ │  blank    │  │
//! │  └────────────┘ └────────────┘ └───────────┘ └───────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!           │ prepare/set, validate/present, fences
//! ┌─────────────────────────────────────────────────────────────┐
//! │        hwcomposer HAL (via libhybris, `hybris` feature)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Synchronization with the display hardware is carried entirely by sync
//! fence file descriptors; the [`fence`] module makes their single-owner
//! lifecycle explicit.

pub mod backend;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fence;
pub mod hal;
pub mod layer;
pub mod power;
pub mod scheduler;
pub mod swapchain;

#[cfg(feature = "hybris")]
pub mod hybris;

#[cfg(test)]
pub(crate) mod testhal;

pub use backend::{DisplayBackend, ScreenDimensions, SurfaceHandle};
pub use config::Config;
pub use context::HwcContext;
pub use engine::{CompositionEngine, OverlayPlane, PresentOutcome};
pub use error::Error;
pub use fence::{Fence, FencePool};
pub use swapchain::{FrameBuffer, SwapSlot};

/// Result type for this crate
pub type Result<T, E = Error> = std::result::Result<T, E>;
