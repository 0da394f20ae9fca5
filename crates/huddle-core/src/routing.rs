//! Video endpoint routing.
//!
//! Every participant may publish a camera and a screen endpoint. Each row
//! shows at most one of them; a screen share wins over the camera. One
//! endpoint at a time can be pinned to the large view, and the row of its
//! owner then falls back to the other endpoint.

use std::collections::{HashMap, HashSet};

use crate::participants::ParticipantStore;
use crate::registry::RowRegistry;

/// A change of the video shown in a row, to be applied by the media layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoChange {
    Attached { peer: String, endpoint: String },
    Detached { peer: String, endpoint: String },
}

#[derive(Debug, Clone, Default)]
pub struct VideoRoutingEngine {
    large_endpoint: String,
    live: HashSet<String>,
    /// Reverse index: endpoint -> peer of the row showing it.
    endpoints: HashMap<String, String>,
}

impl VideoRoutingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pinned(&self) -> &str {
        &self.large_endpoint
    }

    pub fn is_live(&self, endpoint: &str) -> bool {
        !endpoint.is_empty() && self.live.contains(endpoint)
    }

    /// Peer whose row currently shows `endpoint`.
    pub fn row_for_endpoint(&self, endpoint: &str) -> Option<&str> {
        self.endpoints.get(endpoint).map(String::as_str)
    }

    fn pin_shows(&self, endpoint: &str) -> bool {
        !endpoint.is_empty() && self.large_endpoint == endpoint && self.is_live(endpoint)
    }

    /// Handle a change of the pinned endpoint.
    pub fn set_pinned(
        &mut self,
        endpoint: &str,
        registry: &mut RowRegistry,
        store: &ParticipantStore,
    ) -> Vec<VideoChange> {
        let mut changes = Vec::new();
        if self.large_endpoint == endpoint {
            return changes;
        }
        tracing::debug!("pinned endpoint {:?} -> {endpoint:?}", self.large_endpoint);

        // The previously pinned stream returns to its owner's row, replacing
        // nothing or the camera it fell back to.
        let old = std::mem::take(&mut self.large_endpoint);
        if self.is_live(&old) {
            if let Some(participant) = store.participant_by_endpoint(&old) {
                if let Some(row) = registry.find(&participant.peer) {
                    let current = row.video_endpoint();
                    if current.is_empty()
                        || (store.screen_endpoint(participant) == old
                            && store.camera_endpoint(participant) == current)
                    {
                        let peer = participant.peer.clone();
                        self.set_row_endpoint(registry, &peer, &old, &mut changes);
                    }
                }
            }
        }

        self.large_endpoint = endpoint.to_string();
        let Some(participant) = store.participant_by_endpoint(endpoint) else {
            return changes;
        };
        let Some(row) = registry.find(&participant.peer) else {
            return changes;
        };
        if row.video_endpoint() != endpoint {
            return changes;
        }
        // The row was showing what is now large: show the other source.
        let camera = store.camera_endpoint(participant);
        let screen = store.screen_endpoint(participant);
        let fallback = if endpoint == camera && self.is_live(screen) {
            screen
        } else if endpoint == screen && self.is_live(camera) {
            camera
        } else {
            ""
        };
        let peer = participant.peer.clone();
        let fallback = fallback.to_string();
        self.set_row_endpoint(registry, &peer, &fallback, &mut changes);
        changes
    }

    /// Handle a stream becoming available or unavailable.
    pub fn set_stream_live(
        &mut self,
        endpoint: &str,
        live: bool,
        registry: &mut RowRegistry,
        store: &ParticipantStore,
    ) -> Vec<VideoChange> {
        let mut changes = Vec::new();
        if endpoint.is_empty() {
            return changes;
        }
        if live {
            self.stream_up(endpoint, registry, store, &mut changes);
            self.live.insert(endpoint.to_string());
        } else {
            self.live.remove(endpoint);
            self.stream_down(endpoint, registry, store, &mut changes);
        }
        changes
    }

    fn stream_up(
        &mut self,
        endpoint: &str,
        registry: &mut RowRegistry,
        store: &ParticipantStore,
        changes: &mut Vec<VideoChange>,
    ) {
        let Some(participant) = store.participant_by_endpoint(endpoint) else {
            return;
        };
        if !registry.contains(&participant.peer) {
            return;
        }
        let camera = store.camera_endpoint(participant);
        let screen = store.screen_endpoint(participant);
        let attach = if endpoint == camera {
            !self.is_live(screen) || self.pin_shows(screen)
        } else if endpoint == screen {
            !self.pin_shows(screen)
        } else {
            false
        };
        if attach {
            let peer = participant.peer.clone();
            self.set_row_endpoint(registry, &peer, endpoint, changes);
        }
    }

    fn stream_down(
        &mut self,
        endpoint: &str,
        registry: &mut RowRegistry,
        store: &ParticipantStore,
        changes: &mut Vec<VideoChange>,
    ) {
        let Some(peer) = self.endpoints.get(endpoint).cloned() else {
            return;
        };
        let replacement = match store.participant(&peer) {
            None => String::new(),
            Some(participant) => {
                let camera = store.camera_endpoint(participant);
                let screen = store.screen_endpoint(participant);
                if endpoint == camera && self.large_endpoint != screen && self.is_live(screen) {
                    screen.to_string()
                } else if endpoint == screen
                    && self.large_endpoint != camera
                    && self.is_live(camera)
                {
                    camera.to_string()
                } else {
                    String::new()
                }
            }
        };
        self.set_row_endpoint(registry, &peer, &replacement, changes);
    }

    /// Attach the best live endpoint to a freshly inserted row: the screen
    /// before the camera, never the pinned one.
    pub fn route_new_row(
        &mut self,
        peer: &str,
        registry: &mut RowRegistry,
        store: &ParticipantStore,
    ) -> Vec<VideoChange> {
        let mut changes = Vec::new();
        let Some(participant) = store.participant(peer) else {
            return changes;
        };
        let camera = store.camera_endpoint(participant);
        let screen = store.screen_endpoint(participant);
        let best = [screen, camera]
            .into_iter()
            .find(|e| self.is_live(e) && *e != self.large_endpoint && !self.endpoints.contains_key(*e))
            .map(str::to_string);
        if let Some(best) = best {
            self.set_row_endpoint(registry, peer, &best, &mut changes);
        }
        changes
    }

    /// Release whatever the row of `peer` shows, before it is removed.
    pub fn forget_row(&mut self, peer: &str, registry: &mut RowRegistry) -> Vec<VideoChange> {
        let mut changes = Vec::new();
        self.set_row_endpoint(registry, peer, "", &mut changes);
        changes
    }

    /// Show `endpoint` in the row of `peer`, or nothing if it is empty.
    ///
    /// The row's previous endpoint is always detached first, and an endpoint
    /// shown by another row is taken away from it.
    fn set_row_endpoint(
        &mut self,
        registry: &mut RowRegistry,
        peer: &str,
        endpoint: &str,
        changes: &mut Vec<VideoChange>,
    ) {
        let Some(was) = registry.find(peer).map(|row| row.video_endpoint().to_string()) else {
            return;
        };
        if was == endpoint {
            return;
        }
        if !was.is_empty() {
            self.endpoints.remove(&was);
            if let Some(row) = registry.find_mut(peer) {
                row.set_video_endpoint("");
            }
            tracing::debug!("detached {was} from {peer}");
            changes.push(VideoChange::Detached {
                peer: peer.to_string(),
                endpoint: was,
            });
        }
        if endpoint.is_empty() {
            return;
        }
        if let Some(holder) = self.endpoints.get(endpoint).cloned() {
            self.set_row_endpoint(registry, &holder, "", changes);
        }
        if let Some(row) = registry.find_mut(peer) {
            row.set_video_endpoint(endpoint);
        }
        self.endpoints.insert(endpoint.to_string(), peer.to_string());
        tracing::debug!("attached {endpoint} to {peer}");
        changes.push(VideoChange::Attached {
            peer: peer.to_string(),
            endpoint: endpoint.to_string(),
        });
    }

    pub fn clear(&mut self) {
        self.large_endpoint.clear();
        self.live.clear();
        self.endpoints.clear();
    }
}
