//! Error types for the hwcomposer bridge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("hwcomposer initialization failed: {0}")]
    HalInit(String),

    #[error("no display became available")]
    NoDisplay,

    #[error("unsupported hwcomposer API version {0:#x}")]
    UnsupportedVersion(u32),

    #[error("native window already exists")]
    WindowExists,

    #[error("surface has been shut down")]
    SurfaceClosed,

    #[error("event loop error: {0}")]
    EventLoop(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
