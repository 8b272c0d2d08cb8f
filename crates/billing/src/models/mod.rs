//! Persisted billing entities

pub mod invoice;
pub mod plan;
pub mod subscription;

pub use invoice::{Invoice, NewInvoice, PlanSnapshot};
pub use plan::{Feature, Plan};
pub use subscription::{PendingResolution, RenewalTerms, Subscription};
