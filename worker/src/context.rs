use std::{env, fmt};

use log::LevelFilter;

use crate::{Result, RunConfig, WorkerErr, publish::Publisher};

pub const RANK_VAR: &str = "RANK";
pub const LOCAL_RANK_VAR: &str = "LOCAL_RANK";
pub const WORLD_SIZE_VAR: &str = "WORLD_SIZE";
pub const COORDINATOR_ADDR_VAR: &str = "COORDINATOR_ADDR";
const VISIBLE_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// The compute device a rank is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(i) => write!(f, "accelerator:{i}"),
        }
    }
}

/// The rank identity a launcher hands to each process through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankEnv {
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: usize,
    pub coordinator_addr: Option<String>,
}

impl RankEnv {
    /// Reads the rank identity from the process environment. A process started without one is
    /// the only member of its group.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the rank identity through `lookup`.
    ///
    /// # Arguments
    /// * `lookup` - Resolves an environment variable name to its value, if set.
    ///
    /// # Returns
    /// The identity or an error if a variable is malformed or the ranks are out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, default: usize| -> Result<usize> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|e| WorkerErr::Env(format!("{key}={raw}: {e}"))),
                None => Ok(default),
            }
        };

        let rank = parse(RANK_VAR, 0)?;
        let world_size = parse(WORLD_SIZE_VAR, 1)?;
        let local_rank = parse(LOCAL_RANK_VAR, rank)?;

        if world_size == 0 || rank >= world_size {
            return Err(WorkerErr::Env(format!(
                "rank {rank} is outside of a group of {world_size}"
            )));
        }

        let coordinator_addr = lookup(COORDINATOR_ADDR_VAR).filter(|addr| !addr.is_empty());
        if world_size > 1 && coordinator_addr.is_none() {
            return Err(WorkerErr::Env(format!(
                "{COORDINATOR_ADDR_VAR} is required for a group of {world_size}"
            )));
        }

        Ok(Self {
            rank,
            local_rank,
            world_size,
            coordinator_addr,
        })
    }
}

/// Counts the accelerators listed in `CUDA_VISIBLE_DEVICES`. Listing stops at the first `-1`,
/// so both an empty value and `-1` mean there are none.
pub fn visible_accelerators(raw: Option<&str>) -> usize {
    raw.map_or(0, |raw| {
        raw.split(',')
            .map(str::trim)
            .take_while(|id| !id.is_empty() && *id != "-1")
            .count()
    })
}

/// Everything a rank knows about its place in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContext {
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: usize,
    /// The single rank allowed to produce externally observable side effects.
    pub is_coordinator: bool,
    pub device: Device,
}

impl WorkerContext {
    /// Creates a new `WorkerContext`, binding the rank to the accelerator of its local rank.
    ///
    /// # Arguments
    /// * `rank` - The global rank.
    /// * `local_rank` - The rank within the host, used to pick the device.
    /// * `world_size` - The amount of ranks in the group.
    /// * `accelerators` - The amount of accelerators available on the host.
    ///
    /// # Returns
    /// An error if accelerators are present but none matches `local_rank`.
    pub fn new(
        rank: usize,
        local_rank: usize,
        world_size: usize,
        accelerators: usize,
    ) -> Result<Self> {
        if rank >= world_size {
            return Err(WorkerErr::Env(format!(
                "rank {rank} is outside of a group of {world_size}"
            )));
        }

        let device = match accelerators {
            0 => Device::Cpu,
            n if local_rank < n => Device::Accelerator(local_rank),
            available => {
                return Err(WorkerErr::MissingAccelerator {
                    local_rank,
                    available,
                });
            }
        };

        Ok(Self {
            rank,
            local_rank,
            world_size,
            is_coordinator: rank == 0,
            device,
        })
    }

    /// Builds the context of this process from its rank environment and the run parameters.
    pub fn bootstrap(env: &RankEnv, cfg: &RunConfig) -> Result<Self> {
        let accelerators = cfg.accelerators.unwrap_or_else(|| {
            visible_accelerators(env::var(VISIBLE_DEVICES_VAR).ok().as_deref())
        });

        Self::new(env.rank, env.local_rank, env.world_size, accelerators)
    }

    /// The maximum log level of this rank, only the coordinator speaks.
    pub fn log_level(&self) -> LevelFilter {
        if self.is_coordinator {
            LevelFilter::Info
        } else {
            LevelFilter::Off
        }
    }

    /// The artifact publisher, which only exists on the coordinator.
    pub fn publisher<'a>(&self, cfg: &'a RunConfig) -> Option<Publisher<'a>> {
        self.is_coordinator.then(|| Publisher::new(cfg))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn no_environment_means_a_single_rank() {
        let env = RankEnv::from_lookup(lookup(&[])).unwrap();
        assert_eq!((env.rank, env.local_rank, env.world_size), (0, 0, 1));
        assert_eq!(env.coordinator_addr, None);
    }

    #[test]
    fn multi_rank_environment() {
        let env = RankEnv::from_lookup(lookup(&[
            (RANK_VAR, "3"),
            (LOCAL_RANK_VAR, "1"),
            (WORLD_SIZE_VAR, "4"),
            (COORDINATOR_ADDR_VAR, "10.0.0.1:29500"),
        ]))
        .unwrap();

        assert_eq!((env.rank, env.local_rank, env.world_size), (3, 1, 4));
        assert_eq!(env.coordinator_addr.as_deref(), Some("10.0.0.1:29500"));
    }

    #[test]
    fn groups_need_a_coordinator() {
        let err = RankEnv::from_lookup(lookup(&[(RANK_VAR, "0"), (WORLD_SIZE_VAR, "2")]));
        assert!(matches!(err, Err(WorkerErr::Env(_))));
    }

    #[test]
    fn rank_must_be_inside_the_group() {
        let err = RankEnv::from_lookup(lookup(&[
            (RANK_VAR, "2"),
            (WORLD_SIZE_VAR, "2"),
            (COORDINATOR_ADDR_VAR, "127.0.0.1:1"),
        ]));
        assert!(err.is_err());
    }

    #[test]
    fn visible_devices() {
        assert_eq!(visible_accelerators(None), 0);
        assert_eq!(visible_accelerators(Some("")), 0);
        assert_eq!(visible_accelerators(Some("-1")), 0);
        assert_eq!(visible_accelerators(Some("0,1")), 2);
        assert_eq!(visible_accelerators(Some("2,-1,3")), 1);
    }

    #[test]
    fn binds_local_rank_to_its_accelerator() {
        let ctx = WorkerContext::new(3, 1, 4, 2).unwrap();
        assert_eq!(ctx.device, Device::Accelerator(1));
        assert!(!ctx.is_coordinator);

        let ctx = WorkerContext::new(0, 0, 4, 0).unwrap();
        assert_eq!(ctx.device, Device::Cpu);
        assert!(ctx.is_coordinator);
    }

    #[test]
    fn missing_accelerator_is_fatal() {
        let err = WorkerContext::new(2, 2, 4, 2);
        assert!(matches!(
            err,
            Err(WorkerErr::MissingAccelerator {
                local_rank: 2,
                available: 2
            })
        ));
    }

    #[test]
    fn only_the_coordinator_publishes() {
        let cfg: RunConfig = serde_json::from_value(serde_json::json!({
            "data_path": "images",
            "checkpoints_dir": "checkpoints",
            "file_categories": "categories.csv",
            "categories_map": "categories_map.json",
        }))
        .unwrap();

        let coordinator = WorkerContext::new(0, 0, 2, 0).unwrap();
        let peer = WorkerContext::new(1, 1, 2, 0).unwrap();
        assert!(coordinator.publisher(&cfg).is_some());
        assert!(peer.publisher(&cfg).is_none());
        assert_eq!(coordinator.log_level(), LevelFilter::Info);
        assert_eq!(peer.log_level(), LevelFilter::Off);
    }
}
