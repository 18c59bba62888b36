/// Command and screenshot handlers
pub mod handlers;
/// Long reply delivery
pub mod messaging;
/// Replies with flood-control retries
pub mod resilient;
/// Dispatcher setup and listeners
pub mod runner;
/// Services shared across handlers
pub mod state;
/// Chat seam the handlers reply through
pub mod transport;

pub use runner::run_bot;
pub use state::AppState;
