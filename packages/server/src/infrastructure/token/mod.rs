//! Token service adapters.

pub mod hmac;

pub use self::hmac::HmacTokenService;
