//! Core library for `Pagekeeper`.
//!
//! Contains the content and settings document stores, change notification,
//! cross-instance synchronization, the image gallery, admin credentials, and
//! the visitor log. This crate depends on `pagekeeper-storage` for the
//! storage backend trait and knows nothing about how values are persisted.

pub mod auth;
pub mod clock;
pub mod config_store;
pub mod content;
pub mod content_store;
pub mod document;
pub mod error;
pub mod gallery;
pub mod keys;
pub mod notify;
mod persist;
pub mod site;
pub mod sync;
pub mod tracker;
