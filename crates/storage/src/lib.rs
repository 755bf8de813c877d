pub mod selectors;

pub use selectors::{ActionRecord, DomainStats, SelectorRecord, SelectorStore};
