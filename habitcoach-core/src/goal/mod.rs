//! Goal extraction: the record, numeral normalization, slot extraction and
//! completion detection.

pub mod completion;
pub mod extractor;
pub mod numerals;
pub mod record;

pub use completion::{CompletionDetector, CompletionVerdict};
pub use extractor::{EntityExtractor, SlotPattern, SummaryStreamFilter, clean_phrase};
pub use numerals::{normalize_period, normalize_time};
pub use record::{GoalRecord, GoalSlot, Intensity};
