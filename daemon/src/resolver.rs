use std::collections::HashMap;

use common::{RouteInfo, Variant};

use crate::config::RouteEntry;

/// Maps (route path, variant) to the clip URL configured for it.
///
/// Built once from the config route table; pure lookups after that. A path
/// with no mapping yields `None` and the caller skips the transition.
#[derive(Debug, Clone)]
pub struct ModeResolver {
    routes: HashMap<String, ClipPair>,
}

/// The two clip URLs registered for one route
#[derive(Debug, Clone)]
struct ClipPair {
    normal: String,
    uv: String,
}

impl ModeResolver {
    /// Build the resolver from config route entries
    pub fn new(entries: &[RouteEntry]) -> Self {
        let mut routes = HashMap::new();

        for entry in entries {
            if routes
                .insert(
                    entry.path.clone(),
                    ClipPair {
                        normal: entry.normal.clone(),
                        uv: entry.uv.clone(),
                    },
                )
                .is_some()
            {
                log::warn!("Duplicate route {} in config, later entry wins", entry.path);
            }
        }

        log::info!("Route table initialized with {} routes", routes.len());

        Self { routes }
    }

    /// Resolve the clip URL for a path under a variant.
    ///
    /// Returns `None` when no clip is mapped for the path.
    pub fn resolve(&self, path: &str, variant: Variant) -> Option<&str> {
        self.routes.get(path).map(|pair| match variant {
            Variant::Normal => pair.normal.as_str(),
            Variant::Uv => pair.uv.as_str(),
        })
    }

    /// All registered clip URLs with their variants, for registry init
    pub fn clips(&self) -> Vec<(String, Variant)> {
        let mut clips = Vec::with_capacity(self.routes.len() * 2);
        for pair in self.routes.values() {
            clips.push((pair.normal.clone(), Variant::Normal));
            clips.push((pair.uv.clone(), Variant::Uv));
        }
        clips
    }

    /// Route table in IPC form
    pub fn route_infos(&self) -> Vec<RouteInfo> {
        let mut infos: Vec<RouteInfo> = self
            .routes
            .iter()
            .map(|(path, pair)| RouteInfo {
                path: path.clone(),
                normal: pair.normal.clone(),
                uv: pair.uv.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    /// Check if the route table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
