//! Bundled [`Preview`](crate::host::Preview) implementations.

#[cfg(feature = "headless")]
mod headless;

#[cfg(feature = "headless")]
pub use headless::HeadlessPreview;
