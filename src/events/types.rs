//! Channel, topic and payload types of the bus wire contract.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PageCrawled, Site};

/// Named partition of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Sites,
    Pages,
}

/// Named partition of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Added,
    Started,
    Updated,
    Completed,
    Cancelled,
    Crawled,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Sites => f.write_str("Sites"),
            Channel::Pages => f.write_str("Pages"),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Added => "added",
            Topic::Started => "started",
            Topic::Updated => "updated",
            Topic::Completed => "completed",
            Topic::Cancelled => "cancelled",
            Topic::Crawled => "crawled",
        };
        f.write_str(name)
    }
}

/// A `(channel, topic)` pair subscribers register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub channel: Channel,
    pub topic: Topic,
}

impl Route {
    pub const SITE_ADDED: Route = Route::new(Channel::Sites, Topic::Added);
    pub const SITE_STARTED: Route = Route::new(Channel::Sites, Topic::Started);
    pub const SITE_UPDATED: Route = Route::new(Channel::Sites, Topic::Updated);
    pub const SITE_COMPLETED: Route = Route::new(Channel::Sites, Topic::Completed);
    pub const SITE_CANCELLED: Route = Route::new(Channel::Sites, Topic::Cancelled);
    pub const PAGE_CRAWLED: Route = Route::new(Channel::Pages, Topic::Crawled);

    pub const fn new(channel: Channel, topic: Topic) -> Self {
        Self { channel, topic }
    }

    /// Every route of the wire contract.
    pub fn all() -> [Route; 6] {
        [
            Self::SITE_ADDED,
            Self::SITE_STARTED,
            Self::SITE_UPDATED,
            Self::SITE_COMPLETED,
            Self::SITE_CANCELLED,
            Self::PAGE_CRAWLED,
        ]
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.topic)
    }
}

/// Event body.
///
/// Untagged on the wire; `Page` is tried first because every `Site` field
/// has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Page(PageCrawled),
    Site(Site),
}

impl Payload {
    pub fn as_site(&self) -> Option<&Site> {
        match self {
            Payload::Site(site) => Some(site),
            Payload::Page(_) => None,
        }
    }

    pub fn as_page(&self) -> Option<&PageCrawled> {
        match self {
            Payload::Page(page) => Some(page),
            Payload::Site(_) => None,
        }
    }

    /// Id of the site this payload belongs to.
    pub fn site_id(&self) -> &str {
        match self {
            Payload::Site(site) => &site.id,
            Payload::Page(page) => &page.site_id,
        }
    }
}

impl From<Site> for Payload {
    fn from(site: Site) -> Self {
        Payload::Site(site)
    }
}

impl From<PageCrawled> for Payload {
    fn from(page: PageCrawled) -> Self {
        Payload::Page(page)
    }
}

/// A published event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Position in the bus-wide publish order
    pub seq: u64,
    pub channel: Channel,
    pub topic: Topic,
    pub published_at: DateTime<Utc>,
    pub payload: Payload,
}

impl Envelope {
    pub fn route(&self) -> Route {
        Route::new(self.channel, self.topic)
    }

    pub fn is(&self, route: Route) -> bool {
        self.route() == route
    }
}
