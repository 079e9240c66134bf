// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Stateful owners: the key table, the consent table, and the audit
//! trail. Each is the sole mutator of its own state; the application
//! services only read from the first two and append to the third.

pub mod audit_trail;
pub mod consent_store;
pub mod key_manager;
