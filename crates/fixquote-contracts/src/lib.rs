pub mod batch;
pub mod chat;
pub mod device;
pub mod dialogue;
pub mod error;
pub mod events;
pub mod outcome;
pub mod receipts;
pub mod request;
pub mod transcript;
