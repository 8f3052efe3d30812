use crate::types::{ReplicaID, ViewNumber};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a cluster needs at least one replica")]
    NoReplicas,
    #[error("{nr_replicas} replicas cannot tolerate {max_faulty} faulty ones")]
    TooManyFaulty {
        nr_replicas: usize,
        max_faulty: usize,
    },
}

/// Returns the replica that leads `view` in a cluster of `nr_replicas`.
///
/// Every replica must agree on this function; it is what keeps two replicas
/// from both believing they lead the same view. `nr_replicas` must be at
/// least one.
pub fn primary(view: ViewNumber, nr_replicas: usize) -> ReplicaID {
    view % nr_replicas
}

/// Configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    nr_replicas: usize,
    /// The `f` in "tolerates `f` faulty replicas".
    max_faulty: usize,
}

impl Config {
    pub fn new(nr_replicas: usize) -> Config {
        assert!(nr_replicas > 0, "a cluster needs at least one replica");
        let max_faulty = (nr_replicas - 1) / 2;
        Config {
            nr_replicas,
            max_faulty,
        }
    }

    pub fn with_max_faulty(nr_replicas: usize, max_faulty: usize) -> Result<Config, ConfigError> {
        if nr_replicas == 0 {
            return Err(ConfigError::NoReplicas);
        }
        if 2 * max_faulty + 1 > nr_replicas {
            return Err(ConfigError::TooManyFaulty {
                nr_replicas,
                max_faulty,
            });
        }
        Ok(Config {
            nr_replicas,
            max_faulty,
        })
    }

    pub fn nr_replicas(&self) -> usize {
        self.nr_replicas
    }

    pub fn max_faulty(&self) -> usize {
        self.max_faulty
    }

    pub fn primary_id(&self, view_number: ViewNumber) -> ReplicaID {
        primary(view_number, self.nr_replicas)
    }

    pub fn replicas(&self) -> impl Iterator<Item = ReplicaID> {
        0..self.nr_replicas
    }

    /// Smallest number of distinct senders that exceeds `max_faulty`.
    pub fn quorum(&self) -> usize {
        self.max_faulty + 1
    }
}
