pub mod broadcast;
pub mod history;
pub mod payload;
pub mod router;
