//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use chatlink_core::dispatch::DispatchRouter;
use chatlink_core::link::LinkRegistry;
use chatlink_core::ports::{ChatStore, CompletionService};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub completion: Arc<dyn CompletionService>,
    pub registry: LinkRegistry,
    pub router: DispatchRouter,
    pub config: Arc<Config>,
}
