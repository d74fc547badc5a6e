//! Event subscriber trait.
//!
//! Each subscription gets a dedicated worker task and an unbounded FIFO queue,
//! so a slow or failing handler only delays itself:
//!
//! ```text
//! Bus::publish ──► [queue] ──► worker task ──► subscriber.on_event()
//!                                         ├──► Err   → logged, next event
//!                                         └──► panic → caught, logged, next event
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::events::Envelope;

/// Handler bound to one or more bus routes.
///
/// Events are delivered sequentially in publish order. Returning an error or
/// panicking never affects the publisher or other subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    async fn on_event(&self, envelope: &Envelope) -> Result<()>;

    /// Name used in log lines about this subscriber.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
