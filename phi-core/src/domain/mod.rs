// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Value types and error taxonomies for the PHI core. No I/O, no shared
//! mutable state; everything here is a plain value passed by ownership
//! between the validator and the encryptor.

pub mod audit;
pub mod consent;
pub mod event;
pub mod key;
pub mod validation;
