//! Agent Deck backend library.
//!
//! Real-time event distribution and conversation reconstruction for the Agent
//! Deck dashboard: an in-process event bus, the WebSocket subscription hub that
//! fans events out to dashboard clients, the conversation DAG resolver, and the
//! streaming upload channel.

pub mod api;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod events;
pub mod session;
pub mod upload;
pub mod ws;
