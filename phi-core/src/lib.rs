// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AEGIS PHI Core
//!
//! Clinical-event data core: every event passes through validation,
//! and PHI-flagged events are additionally gated on an active patient
//! consent and encrypted at rest with auditable key management.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Validation, consent enforcement, PHI encryption
//!
//! Data flow: raw event → [`application::validator::EventValidator`] →
//! (if `meta.phi`) [`application::phi_encryptor::PhiEncryptor`], which
//! consults [`infrastructure::consent_store::ConsentStore`] and
//! [`infrastructure::key_manager::KeyManager`] and writes to
//! [`infrastructure::audit_trail::AuditTrail`].

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
