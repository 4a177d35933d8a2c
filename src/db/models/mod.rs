pub mod reading;

pub use reading::{Reading, ReadingStatus, StoredReading};
