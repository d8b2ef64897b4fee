pub mod error;
pub mod order;
pub mod pile;
pub mod request;
pub mod tariff;
pub mod user;

// Re-export commonly used types
pub use error::{DomainError, DomainResult};
pub use order::Order;
pub use pile::{ChargeType, Pile, PileStatus};
pub use request::{ChargeRequest, RequestStatus};
pub use tariff::{TariffPeriod, TariffTable};
pub use user::{User, UserRole};
