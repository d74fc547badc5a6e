//! In-process event bus connecting the scheduler, its workers and the
//! collaborators that discover sites or archive crawled pages.
//!
//! | Channel | Topic       | Publisher        | Payload                     |
//! |---------|-------------|------------------|-----------------------------|
//! | Sites   | added       | discovery source | `Site`                      |
//! | Sites   | started     | scheduler        | `Site`, status `running`    |
//! | Sites   | updated     | scheduler        | `Site`, refreshed counters  |
//! | Sites   | completed   | scheduler        | `Site`, `fileIndex` set     |
//! | Sites   | cancelled   | scheduler        | `Site`, worker torn down    |
//! | Pages   | crawled     | worker           | `PageCrawled`               |

mod bus;
mod subscriber;
mod types;

pub use bus::{Bus, Subscription, Tap};
pub use subscriber::Subscribe;
pub use types::{Channel, Envelope, Payload, Route, Topic};
