pub mod types;

pub use types::{
    CustomerId, DiscountId, Money, OrderId, PaymentId, ReservationId, SessionId, VariantId,
};
