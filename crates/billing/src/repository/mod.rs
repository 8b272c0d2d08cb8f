//! Persistence for plans, subscriptions and invoices
//!
//! Every function takes an explicit connection. Callers pass a `Transaction` (which
//! derefs to `PgConnection`) when several writes must commit together, or a pooled
//! connection for single statements.

pub mod invoices;
pub mod plans;
pub mod subscriptions;
