//! Turnstile - Distributed Rate Limiting Service
//!
//! This crate implements a distributed token-bucket rate limiter with
//! atomic acquire-and-expire semantics, built on a shared key-value store
//! reachable by every service instance. The store is the single source of
//! truth: no instance caches bucket state, so a fleet of instances enforces
//! one budget per discriminator. A one-time captcha subsystem shares the
//! store under a separate namespace.

pub mod captcha;
pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;
pub mod store;
