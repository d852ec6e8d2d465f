//! # Rust ATE Instrument Kernel
//!
//! Instrument-abstraction layer for automated semiconductor test. Test code addresses
//! logical pins across parallel test sites; the kernel resolves them to channels of a
//! heterogeneous set of instrument sessions, fans driver actions out over those channels
//! in parallel, and folds the results back into pin/site addressable data.
//!
//! ## Crate Structure
//!
//! - **`addressing`**: `ChannelAddress`, `SessionId`, site numbers, ganged/merged cascading.
//! - **`data`**: `SiteData`, `PinSiteData` and the `PinSiteTable` value tables operations take.
//! - **`broadcast`**: picks the one table value that applies to a channel.
//! - **`pin_map`**: the `PinMapProvider` interface and an in-memory pin map.
//! - **`driver`**: the `DriverSession` trait vendor drivers are reached through.
//! - **`capability`**: per-model feature support and trigger terminal naming.
//! - **`registry`** / **`bundle`**: session ownership and pin/site resolution into bundles.
//! - **`executor`**: fork-join fan-out with aggregate failure reporting.
//! - **`reducer`**: per-instrument and per-site result shapes.
//! - **`sync`**: leader/follower synchronized acquisition state machine.
//! - **`host`**: the test-host context (active sites, publishing).
//! - **`manager`**: `SessionManager`, the explicitly owned kernel context.
//! - **`dcpower`**: source-measure operations built on the kernel.
//! - **`persist`**: per-(pin, site) CSV dumps.
//! - **`mock`**: simulated SMUs sharing a simulated trigger backplane.
//! - **`config`** / **`logging`** / **`error`**: configuration, tracing setup, error types.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rust_ate::prelude::*;
//!
//! let manager = SessionManager::from_pin_map(&pin_map, sessions, host, KernelConfig::default())?;
//! let vdd = manager.dcpower(&["VDD"])?;
//! vdd.force_current(&PinSiteTable::per_pin([("VDD", ForceSettings::new(0.1, Some(5.0)))]))?;
//! let voltages = vdd.measure_voltage()?;
//! ```

pub mod addressing;
pub mod broadcast;
pub mod bundle;
pub mod capability;
pub mod config;
pub mod data;
pub mod dcpower;
pub mod driver;
pub mod error;
pub mod executor;
pub mod host;
pub mod logging;
pub mod manager;
pub mod mock;
pub mod persist;
pub mod pin_map;
pub mod reducer;
pub mod registry;
pub mod sync;

/// Commonly used types.
pub mod prelude {
    pub use crate::addressing::{ChannelAddress, SessionId, SiteNumber, SYSTEM_SITE};
    pub use crate::bundle::{Bundle, SessionHandle};
    pub use crate::capability::{CapabilityTable, Feature};
    pub use crate::config::KernelConfig;
    pub use crate::data::{PinSiteData, PinSiteTable, SiteData};
    pub use crate::dcpower::{DcPower, ForceSettings, MeasureSettings};
    pub use crate::driver::{DriverSession, SourceSettings, TriggerKind};
    pub use crate::error::{AppResult, AteError};
    pub use crate::executor::{ChannelResults, ParallelExecutor};
    pub use crate::host::{RecordingHost, TestHostContext};
    pub use crate::manager::SessionManager;
    pub use crate::pin_map::{PinMap, PinMapProvider};
    pub use crate::reducer::SharedPinPolicy;
    pub use crate::registry::SessionRegistry;
    pub use crate::sync::{AcquisitionPhase, AcquisitionSettings, SynchronizedAcquisition};
}
