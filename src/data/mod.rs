//! Pin- and site-aware value containers.
//!
//! - [`SiteData`]: one value per site.
//! - [`PinSiteData`]: one value per (pin, site), the consumer-facing result shape.
//! - [`PinSiteTable`]: caller-supplied input table in one of four reduced forms; the
//!   broadcast resolver picks the value that applies to each resolved channel.

pub mod pin_site_data;
pub mod site_data;
pub mod table;

pub use pin_site_data::PinSiteData;
pub use site_data::SiteData;
pub use table::{PinSiteTable, TableShape};
