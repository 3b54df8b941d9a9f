//! Refund requests and their distribution across customer, shop and platform.

pub mod manager;
pub mod models;
pub mod saga;

pub use manager::RefundManager;
pub use models::{
    CustomerDebt, NewRefund, RefundFilter, RefundReason, RefundRecipient, RefundRequest,
    RefundStatus, RefundTransition,
};
pub use saga::Saga;
