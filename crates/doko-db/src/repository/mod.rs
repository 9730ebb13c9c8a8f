//! # Repository Module
//!
//! Database repository implementations for DOKO.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OrderService / PaymentService (apps/api)                               │
//! │       │                                                                 │
//! │       │  db.orders().create_with_reservation(&order, cash)             │
//! │       ▼                                                                 │
//! │  ProductRepository      OrderRepository      TransactionRepository     │
//! │  ├── insert             ├── create_with_     ├── insert                │
//! │  ├── try_reserve  ◄─────┤   reservation      ├── complete / fail       │
//! │  ├── release      ◄─────┤── cancel_and_      ├── apply_refund          │
//! │  └── ...                │   restock          └── list_stale            │
//! │       │                 └── advance_status        │                     │
//! │       ▼                                           ▼                     │
//! │  SQLite Database (single-statement conditional updates)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Listings and stock
//! - [`OrderRepository`](order::OrderRepository) - Orders, line items, status
//! - [`TransactionRepository`](transaction::TransactionRepository) - Payment attempts and refunds

pub mod order;
pub mod product;
pub mod transaction;
