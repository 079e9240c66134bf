// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! The two pure services every event passes through: the validator and
//! the PHI encryptor. Neither holds mutable state of its own, so both
//! are safely callable from concurrent callers without locking.

pub mod phi_encryptor;
pub mod validator;
