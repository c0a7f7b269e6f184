//! Static territory graph.
//!
//! This module contains:
//! - Territory and region definitions as loaded from a map document
//! - Load-time validation of the adjacency graph
//! - Adjacency and region queries used by the resolver
//!
//! A [`GameMap`] is immutable once loaded. Every reference to an unknown
//! territory is rejected while loading, so runtime lookups only fail for
//! names that come from untrusted input (player actions).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use thiserror::Error;

/// Territory identifier (its unique name)
pub type TerritoryId = String;

/// Region identifier (its unique name)
pub type RegionId = String;

/// Errors raised while loading a map. These are fatal configuration errors.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("map '{0}' has no territories")]
    Empty(String),

    #[error("territory '{territory}' lists unknown neighbour '{neighbour}'")]
    UnknownNeighbour {
        territory: TerritoryId,
        neighbour: TerritoryId,
    },

    #[error("territory '{0}' lists itself as a neighbour")]
    SelfNeighbour(TerritoryId),

    #[error("territory '{from}' lists '{to}' as a neighbour but not the other way round")]
    AsymmetricAdjacency { from: TerritoryId, to: TerritoryId },

    #[error("region '{region}' contains unknown territory '{territory}'")]
    UnknownRegionMember {
        region: RegionId,
        territory: TerritoryId,
    },

    #[error("region '{0}' has no territories")]
    EmptyRegion(RegionId),

    #[error("territory '{territory}' belongs to both '{first}' and '{second}'")]
    OverlappingRegions {
        territory: TerritoryId,
        first: RegionId,
        second: RegionId,
    },

    #[error("invalid map document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read map file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A single territory on the map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Territory {
    /// Territories reachable in one move
    pub neighbours: BTreeSet<TerritoryId>,
    /// Label anchor for rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<String>,
    /// Outline for rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Territory {
    /// Create a territory with the given neighbours and no geometry
    pub fn with_neighbours<I, S>(neighbours: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TerritoryId>,
    {
        Self {
            neighbours: neighbours.into_iter().map(Into::into).collect(),
            center: None,
            path: None,
        }
    }
}

/// A group of territories that grants a bonus to whoever holds all of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Extra reinforcements per turn for owning every member
    pub bonus: u32,
    /// Member territories
    pub territories: BTreeSet<TerritoryId>,
}

impl Region {
    pub fn new<I, S>(bonus: u32, territories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TerritoryId>,
    {
        Self {
            bonus,
            territories: territories.into_iter().map(Into::into).collect(),
        }
    }
}

/// Map document as it appears on disk and on the wire, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct MapDocument {
    pub name: String,
    #[serde(default)]
    pub asset_path: Option<String>,
    pub territories: BTreeMap<TerritoryId, Territory>,
    #[serde(default)]
    pub regions: BTreeMap<RegionId, Region>,
}

/// A validated, immutable map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MapDocument")]
pub struct GameMap {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_path: Option<String>,
    territories: BTreeMap<TerritoryId, Territory>,
    regions: BTreeMap<RegionId, Region>,
    #[serde(skip)]
    region_index: HashMap<TerritoryId, RegionId>,
}

impl TryFrom<MapDocument> for GameMap {
    type Error = MapError;

    fn try_from(doc: MapDocument) -> Result<Self, Self::Error> {
        let mut map = GameMap::new(doc.name, doc.territories, doc.regions)?;
        map.asset_path = doc.asset_path;
        Ok(map)
    }
}

impl GameMap {
    /// Build a map, validating the adjacency graph and region membership
    pub fn new(
        name: impl Into<String>,
        territories: BTreeMap<TerritoryId, Territory>,
        regions: BTreeMap<RegionId, Region>,
    ) -> Result<Self, MapError> {
        let name = name.into();
        if territories.is_empty() {
            return Err(MapError::Empty(name));
        }

        for (id, territory) in &territories {
            for neighbour in &territory.neighbours {
                if neighbour == id {
                    return Err(MapError::SelfNeighbour(id.clone()));
                }
                let other = territories
                    .get(neighbour)
                    .ok_or_else(|| MapError::UnknownNeighbour {
                        territory: id.clone(),
                        neighbour: neighbour.clone(),
                    })?;
                if !other.neighbours.contains(id) {
                    return Err(MapError::AsymmetricAdjacency {
                        from: id.clone(),
                        to: neighbour.clone(),
                    });
                }
            }
        }

        let mut region_index: HashMap<TerritoryId, RegionId> = HashMap::new();
        for (region_id, region) in &regions {
            if region.territories.is_empty() {
                return Err(MapError::EmptyRegion(region_id.clone()));
            }
            for member in &region.territories {
                if !territories.contains_key(member) {
                    return Err(MapError::UnknownRegionMember {
                        region: region_id.clone(),
                        territory: member.clone(),
                    });
                }
                if let Some(first) = region_index.insert(member.clone(), region_id.clone()) {
                    return Err(MapError::OverlappingRegions {
                        territory: member.clone(),
                        first,
                        second: region_id.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name,
            asset_path: None,
            territories,
            regions,
            region_index,
        })
    }

    /// Parse and validate a map document
    pub fn from_json(json: &str) -> Result<Self, MapError> {
        let doc: MapDocument = serde_json::from_str(json)?;
        Self::try_from(doc)
    }

    /// Read and validate a map document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// The three-territory test map the game was first played on
    pub fn alpha() -> Self {
        let territory = |neighbours: [&str; 2], center: &str| Territory {
            center: Some(center.to_string()),
            ..Territory::with_neighbours(neighbours)
        };

        let mut territories = BTreeMap::new();
        territories.insert(
            "Arafan".to_string(),
            territory(["Moncton", "Creer"], "129.602 179.980"),
        );
        territories.insert(
            "Moncton".to_string(),
            territory(["Arafan", "Creer"], "203.214 177.922"),
        );
        territories.insert(
            "Creer".to_string(),
            territory(["Moncton", "Arafan"], "172.310 253.654"),
        );

        let mut map = Self::new("alpha", territories, BTreeMap::new())
            .expect("built-in alpha map is valid");
        map.asset_path = Some("/maps/alpha".to_string());
        map
    }

    /// Whether the territory exists on this map
    pub fn contains(&self, territory: &str) -> bool {
        self.territories.contains_key(territory)
    }

    /// Look up a territory definition
    pub fn territory(&self, territory: &str) -> Option<&Territory> {
        self.territories.get(territory)
    }

    /// All territory names in a stable order
    pub fn territory_names(&self) -> impl Iterator<Item = &TerritoryId> {
        self.territories.keys()
    }

    pub fn territory_count(&self) -> usize {
        self.territories.len()
    }

    /// Territories one move away from `territory`
    pub fn neighbours(&self, territory: &str) -> Option<&BTreeSet<TerritoryId>> {
        self.territories.get(territory).map(|t| &t.neighbours)
    }

    /// Check whether two territories share a border
    pub fn is_adjacent(&self, from: &str, to: &str) -> bool {
        self.neighbours(from)
            .map(|n| n.contains(to))
            .unwrap_or(false)
    }

    /// The region a territory belongs to, if any
    pub fn region_of(&self, territory: &str) -> Option<&RegionId> {
        self.region_index.get(territory)
    }

    pub fn region(&self, region: &str) -> Option<&Region> {
        self.regions.get(region)
    }

    /// All regions in a stable order
    pub fn regions(&self) -> impl Iterator<Item = (&RegionId, &Region)> {
        self.regions.iter()
    }

    /// Breadth-first distances from `source` to every territory within
    /// `max_distance` moves, excluding `source` itself.
    pub fn distances_from(&self, source: &str, max_distance: u32) -> BTreeMap<TerritoryId, u32> {
        let mut distances = BTreeMap::new();
        if !self.contains(source) {
            return distances;
        }

        let mut queue = VecDeque::new();
        queue.push_back((source, 0u32));
        distances.insert(source.to_string(), 0);

        while let Some((current, distance)) = queue.pop_front() {
            if distance == max_distance {
                continue;
            }
            for neighbour in self.neighbours(current).into_iter().flatten() {
                if !distances.contains_key(neighbour) {
                    distances.insert(neighbour.clone(), distance + 1);
                    queue.push_back((neighbour.as_str(), distance + 1));
                }
            }
        }

        distances.remove(source);
        distances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line_map() -> GameMap {
        let doc = json!({
            "name": "line",
            "territories": {
                "a": { "neighbours": ["b"] },
                "b": { "neighbours": ["a", "c"] },
                "c": { "neighbours": ["b", "d"] },
                "d": { "neighbours": ["c"] }
            },
            "regions": {
                "west": { "bonus": 2, "territories": ["a", "b"] }
            }
        });
        GameMap::from_json(&doc.to_string()).unwrap()
    }

    #[test]
    fn test_alpha_map_is_fully_connected() {
        let map = GameMap::alpha();
        assert_eq!(map.territory_count(), 3);
        assert!(map.is_adjacent("Arafan", "Moncton"));
        assert!(map.is_adjacent("Creer", "Arafan"));
        assert!(map.region_of("Arafan").is_none());
    }

    #[test]
    fn test_region_lookup() {
        let map = line_map();
        assert_eq!(map.region_of("a").map(String::as_str), Some("west"));
        assert_eq!(map.region_of("c"), None);
        assert_eq!(map.region("west").unwrap().bonus, 2);
    }

    #[test]
    fn test_unknown_territory_queries() {
        let map = line_map();
        assert!(map.neighbours("atlantis").is_none());
        assert!(!map.is_adjacent("atlantis", "a"));
        assert!(map.distances_from("atlantis", 3).is_empty());
    }

    #[test]
    fn test_distances_from() {
        let map = line_map();
        let reach = map.distances_from("a", 2);
        assert_eq!(reach.get("b"), Some(&1));
        assert_eq!(reach.get("c"), Some(&2));
        assert_eq!(reach.get("d"), None);
        assert!(!reach.contains_key("a"));
    }

    #[test]
    fn test_rejects_unknown_neighbour() {
        let doc = json!({
            "name": "broken",
            "territories": { "a": { "neighbours": ["zzz"] } }
        });
        let err = GameMap::from_json(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("unknown neighbour 'zzz'"), "{err}");
    }

    #[test]
    fn test_rejects_asymmetric_adjacency() {
        let mut territories = BTreeMap::new();
        territories.insert("a".to_string(), Territory::with_neighbours(["b"]));
        territories.insert("b".to_string(), Territory::default());
        let err = GameMap::new("oneway", territories, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MapError::AsymmetricAdjacency { .. }));
    }

    #[test]
    fn test_rejects_self_neighbour() {
        let mut territories = BTreeMap::new();
        territories.insert("a".to_string(), Territory::with_neighbours(["a"]));
        let err = GameMap::new("loop", territories, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MapError::SelfNeighbour(t) if t == "a"));
    }

    #[test]
    fn test_rejects_bad_regions() {
        let mut territories = BTreeMap::new();
        territories.insert("a".to_string(), Territory::default());

        let mut regions = BTreeMap::new();
        regions.insert("r".to_string(), Region::new(1, ["a", "b"]));
        let err = GameMap::new("m", territories.clone(), regions).unwrap_err();
        assert!(matches!(err, MapError::UnknownRegionMember { .. }));

        let mut regions = BTreeMap::new();
        regions.insert("r1".to_string(), Region::new(1, ["a"]));
        regions.insert("r2".to_string(), Region::new(1, ["a"]));
        let err = GameMap::new("m", territories, regions).unwrap_err();
        assert!(matches!(err, MapError::OverlappingRegions { .. }));
    }

    #[test]
    fn test_rejects_empty_region() {
        let doc = json!({
            "name": "hollow",
            "territories": {
                "a": { "neighbours": ["b"] },
                "b": { "neighbours": ["a"] }
            },
            "regions": {
                "nowhere": { "bonus": 5, "territories": [] }
            }
        });
        let err = GameMap::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, MapError::EmptyRegion(r) if r == "nowhere"));
    }

    #[test]
    fn test_rejects_empty_map() {
        let err = GameMap::from_json(r#"{"name": "void", "territories": {}}"#).unwrap_err();
        assert!(err.to_string().contains("no territories"));
    }

    #[test]
    fn test_document_round_trip_keeps_regions() {
        let map = line_map();
        let json = serde_json::to_string(&map).unwrap();
        let back = GameMap::from_json(&json).unwrap();
        assert_eq!(back.region_of("b").map(String::as_str), Some("west"));
        assert_eq!(back.neighbours("c"), map.neighbours("c"));
    }
}
