//! Seam between the driver and whatever renders the aggregator page.
//!
//! The driver only needs to navigate, find and trigger each sub-source's
//! "more results" control, wait for the page to settle and read the network
//! responses the page received. Locating elements, scrolling and clicking
//! belong to the implementation.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurfaceError {
    /// Interaction failed but may succeed if repeated (element not yet
    /// interactable, click intercepted, wait timed out).
    #[error("transient interaction fault: {0}")]
    Transient(String),

    /// The surface or its network is gone. Fatal to the run.
    #[error("surface disconnected: {0}")]
    Disconnected(String),
}

/// One independently paginated result feed on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubSource {
    /// Short id used by the page for the feed's results container.
    pub id: &'static str,
    pub name: &'static str,
}

pub const SUB_SOURCES: &[SubSource] = &[
    SubSource { id: "te", name: "autotempest" },
    SubSource { id: "hem", name: "hemmings" },
    SubSource { id: "cm", name: "cars" },
    SubSource { id: "cs", name: "carsoup" },
    SubSource { id: "cv", name: "carvana" },
    SubSource { id: "cx", name: "carmax" },
    SubSource { id: "at", name: "autotrader" },
    SubSource { id: "eb", name: "ebay" },
    SubSource { id: "ot", name: "other" },
];

pub fn sub_source(id: &str) -> Option<SubSource> {
    SUB_SOURCES.iter().copied().find(|s| s.id == id)
}

/// A located control, valid until the next trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub sub_source: &'static str,
    pub locator: String,
}

/// A response the page received while it was driven.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkEvent {
    /// Identifier unique per response within one surface session.
    pub id: String,
    pub url: String,
    pub body: String,
}

pub trait RenderingSurface {
    fn navigate(&mut self, url: &str) -> Result<(), SurfaceError>;

    /// Close a transient overlay covering the controls, if one is showing.
    /// Returns whether anything was dismissed.
    fn dismiss_overlay(&mut self) -> Result<bool, SurfaceError> {
        Ok(false)
    }

    /// `Ok(None)` means the sub-source has no control: it is exhausted.
    fn find_control(&mut self, sub_source: &SubSource) -> Result<Option<Control>, SurfaceError>;

    /// Returns whether the trigger took effect.
    fn trigger(&mut self, control: &Control) -> Result<bool, SurfaceError>;

    /// Wait until the page stops loading. `false` on timeout.
    fn wait_for_idle(&mut self, timeout: Duration) -> Result<bool, SurfaceError>;

    /// Responses captured so far whose url contains `url_filter`.
    fn captured_network_events(&mut self, url_filter: &str) -> Result<Vec<NetworkEvent>, SurfaceError>;

    /// Drop captured responses that were already read.
    fn clear_captured(&mut self) -> Result<(), SurfaceError> {
        Ok(())
    }
}
