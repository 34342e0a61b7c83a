//! File-backed rendering surface that replays recorded result pages.
//!
//! Layout: one sub-directory per sub-source id, each holding its pages in
//! order as `000.json`, `001.json`, ... Navigating reveals page 0 of every
//! sub-source; triggering a sub-source's control reveals its next page. A
//! sub-source whose pages have all been revealed has no control.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::surface::{self, Control, NetworkEvent, RenderingSurface, SubSource, SurfaceError};

/// Url path the replayed responses are reported under.
const RESPONSE_PATH: &str = "queue-results";

struct Feed {
    pages: Vec<String>,
    revealed: usize,
}

pub struct ReplaySurface {
    feeds: BTreeMap<&'static str, Feed>,
    captured: Vec<NetworkEvent>,
    navigated: bool,
}

impl ReplaySurface {
    pub fn open(root: &Path) -> std::io::Result<Self> {
        let mut feeds = BTreeMap::new();

        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(source) = surface::sub_source(&name) else {
                warn!(dir = %name, "not a known sub-source, ignoring");
                continue;
            };

            let mut files: Vec<PathBuf> = std::fs::read_dir(entry.path())?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            files.sort();

            let pages = files
                .iter()
                .map(std::fs::read_to_string)
                .collect::<std::io::Result<Vec<_>>>()?;

            debug!(sub_source = source.name, pages = pages.len(), "loaded replay feed");
            feeds.insert(source.id, Feed { pages, revealed: 0 });
        }

        info!(root = %root.display(), feeds = feeds.len(), "opened replay surface");

        Ok(ReplaySurface {
            feeds,
            captured: Vec::new(),
            navigated: false,
        })
    }

    fn reveal(&mut self, id: &'static str) -> bool {
        let Some(feed) = self.feeds.get_mut(id) else {
            return false;
        };
        let Some(body) = feed.pages.get(feed.revealed) else {
            return false;
        };

        let page = feed.revealed;
        self.captured.push(NetworkEvent {
            id: format!("{id}-{page:03}"),
            url: format!("replay://{id}/{RESPONSE_PATH}?page={page}"),
            body: body.clone(),
        });
        feed.revealed += 1;
        true
    }
}

impl RenderingSurface for ReplaySurface {
    fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        debug!(url, "replay navigate");
        if !self.navigated {
            self.navigated = true;
            let ids: Vec<&'static str> = self.feeds.keys().copied().collect();
            for id in ids {
                self.reveal(id);
            }
        }
        Ok(())
    }

    fn find_control(&mut self, sub_source: &SubSource) -> Result<Option<Control>, SurfaceError> {
        if !self.navigated {
            return Ok(None);
        }

        let has_more = self
            .feeds
            .get(sub_source.id)
            .is_some_and(|feed| feed.revealed < feed.pages.len());

        Ok(has_more.then(|| Control {
            sub_source: sub_source.id,
            locator: format!("#{}-results section button", sub_source.id),
        }))
    }

    fn trigger(&mut self, control: &Control) -> Result<bool, SurfaceError> {
        Ok(self.reveal(control.sub_source))
    }

    fn wait_for_idle(&mut self, _timeout: Duration) -> Result<bool, SurfaceError> {
        Ok(true)
    }

    fn captured_network_events(&mut self, url_filter: &str) -> Result<Vec<NetworkEvent>, SurfaceError> {
        Ok(self
            .captured
            .iter()
            .filter(|e| e.url.contains(url_filter))
            .cloned()
            .collect())
    }

    fn clear_captured(&mut self) -> Result<(), SurfaceError> {
        self.captured.clear();
        Ok(())
    }
}
