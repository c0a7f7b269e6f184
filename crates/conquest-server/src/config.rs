//! Start-up configuration, read once from the environment.

use anyhow::{bail, Context};
use conquest_core::GameMap;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Server settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to listen on (`CONQUEST_ADDR`)
    pub addr: SocketAddr,
    /// Directory of extra map documents (`CONQUEST_MAP_DIR`)
    pub map_dir: Option<PathBuf>,
    /// Dice seed for reproducible games (`CONQUEST_SEED`)
    pub seed: Option<u64>,
    /// Open a lobby on the alpha map at start-up (`CONQUEST_DEMO_GAME`)
    pub demo_game: bool,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let addr = var("CONQUEST_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse()
            .context("invalid CONQUEST_ADDR")?;

        let seed = var("CONQUEST_SEED")
            .map(|seed| seed.parse().context("invalid CONQUEST_SEED"))
            .transpose()?;

        let demo_game = match var("CONQUEST_DEMO_GAME").as_deref() {
            None | Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => bail!("invalid CONQUEST_DEMO_GAME: {other}"),
        };

        Ok(Self {
            addr,
            map_dir: var("CONQUEST_MAP_DIR").map(PathBuf::from),
            seed,
            demo_game,
        })
    }

    /// The built-in alpha map plus every `*.json` document in the map
    /// directory, keyed by map name
    pub fn load_maps(&self) -> anyhow::Result<BTreeMap<String, Arc<GameMap>>> {
        let alpha = GameMap::alpha();
        let mut maps = BTreeMap::from([(alpha.name.clone(), Arc::new(alpha))]);

        let Some(dir) = &self.map_dir else {
            return Ok(maps);
        };

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read map directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let map = GameMap::load(&path)
                .with_context(|| format!("invalid map {}", path.display()))?;
            info!(
                map = %map.name,
                territories = map.territory_count(),
                path = %path.display(),
                "loaded map"
            );
            if maps.contains_key(&map.name) {
                bail!("duplicate map name '{}' in {}", map.name, path.display());
            }
            maps.insert(map.name.clone(), Arc::new(map));
        }

        Ok(maps)
    }
}
