pub mod listing;
pub mod retry;
