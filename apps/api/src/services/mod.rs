//! Business services behind the HTTP handlers.
//!
//! Handlers stay thin: they authenticate, deserialize and delegate here.

pub mod catalog_service;
pub mod notification_service;
pub mod order_service;
pub mod payment_service;
