//! Core data types shared by the decision engines.
//!
//! All timestamps are `DateTime<Utc>` and all structs derive serde so they can
//! be read from the replay stream and rendered into health JSON unchanged.

pub mod enums;
pub mod market_data;
pub mod trading;

pub use enums::*;
pub use market_data::*;
pub use trading::*;
