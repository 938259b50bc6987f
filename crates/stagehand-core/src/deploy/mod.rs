//! Deploy records, the phase machine and the driver that runs them.

pub mod driver;
pub mod error;
pub mod handlers;
pub mod model;
pub mod phase;
pub mod session;

pub use driver::Driver;
pub use error::{DriverError, StepError};
pub use model::{
    Deploy, EoaMetadata, MultisigMetadata, ScriptMetadata, Segment, SegmentMetadata,
};
pub use phase::{Phase, PhaseError, advance, advance_segment, persist};
pub use session::{PollPolicy, Session, StepOptions};
