//! portrelay: forwards an external TCP port to a loopback backend port,
//! optionally rewriting the HTTP `Host:` header so the backend sees
//! `localhost:<internal_port>`.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), portrelay::relay::BindError> {
//! let handle = portrelay::relay::start(5000, 8080, true)?;
//! // ... serve until told otherwise ...
//! handle.stop();
//! handle.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod net_info;
pub mod relay;

pub use config::{RelayConfig, Settings};
pub use relay::{BindError, RelayHandle, RelayListener};
