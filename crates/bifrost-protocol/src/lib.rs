/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Bifrost Protocol
//!
//! Data model and session contract for the bridge management protocol.
//!
//! The `messages` module holds every value exchanged with the management
//! server: remote configuration maps, component health trees, agent
//! descriptions, capability masks, and telemetry connection settings.
//!
//! The `session` module defines the two trait seams between the agent core
//! and whatever carries the wire traffic: `ManagementClient` for outbound
//! operations and `SessionCallbacks` for inbound delivery.
//!
//! The `time` module converts wall-clock values into the non-negative
//! nanosecond timestamps the protocol requires.

pub mod messages;
pub mod session;
pub mod time;
