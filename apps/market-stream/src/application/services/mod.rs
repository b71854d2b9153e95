//! Application Services
//!
//! - `TickRouter`: decodes frames and applies market data to snapshots
//! - `StreamCore`: single owner of subscription, snapshot and connection state
//! - `StreamFacade`: the surface consumed by the UI layer

pub mod events;
pub mod facade;
pub mod router;
pub mod stream;

pub use events::{ObserverId, StreamEvent};
pub use facade::StreamFacade;
pub use router::{DiagnosticsSnapshot, RouteOutcome, TickRouter};
pub use stream::StreamCore;
