//! Upgrade compatibility checks.
//!
//! Writes a fixture with an older release, then verifies the current
//! binaries read the same data directory back unchanged. See
//! [`CompatibilityScenario`] for the protocol and [`compare`] for how
//! results are matched.

pub mod compare;
pub mod error;
pub mod fixture;
pub mod scenario;

pub use compare::{CompareMode, Difference, JsonDiff, compare_json};
pub use error::{Error, Result};
pub use fixture::{CompatibilityFixture, QueryCheck};
pub use scenario::{CheckOutcome, CompatibilityScenario, Phase, ScenarioReport};
