pub mod momo;
pub mod paystack;

pub use momo::{MomoConfig, MomoProvider};
pub use paystack::{PaystackConfig, PaystackProvider};
