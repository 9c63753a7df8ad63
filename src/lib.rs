//! AgroWatch: farm and rural-credit record keeping with a due-date
//! notification engine.
//!
//! The crate tracks people, farms, documents with expiry dates and
//! debts with final due dates, and emails reminders at fixed lead
//! times before each due date. Delivery history is persisted so a
//! reminder for a given obligation and lead time is sent at most once.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod scheduler;
pub mod server;
