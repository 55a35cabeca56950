//! Spike output: two parallel root datasets, `gids` and `times`.

use crate::error::{Result, StoreError};
use crate::file::File;
use crate::record::Gid;
use crate::view::View;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Insertion order.
    #[default]
    None,
    /// By time, ties broken by gid.
    Time,
    /// By gid, then time.
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spike {
    pub gid: Gid,
    pub time: f64,
}

impl Spike {
    pub fn new(gid: Gid, time: f64) -> Self {
        Self { gid, time }
    }
}

pub fn write_spikes(path: impl AsRef<Path>, spikes: &[Spike], order: SortOrder) -> Result<()> {
    let mut sorted = spikes.to_vec();
    match order {
        SortOrder::None => {}
        SortOrder::Time => {
            sorted.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.gid.cmp(&b.gid)))
        }
        SortOrder::Id => {
            sorted.sort_by(|a, b| a.gid.cmp(&b.gid).then(a.time.total_cmp(&b.time)))
        }
    }

    let gids = sorted
        .iter()
        .map(|s| {
            i32::try_from(s.gid).map_err(|_| {
                StoreError::structural(format!("gid {} does not fit the gids dataset", s.gid))
            })
        })
        .collect::<Result<Vec<i32>>>()?;
    let times: Vec<f64> = sorted.iter().map(|s| s.time).collect();

    let mut file = File::create(path.as_ref())?;
    let root = file.root_mut()?;
    root.add_dataset("gids", gids)?;
    root.add_dataset("times", times)?;
    info!(
        path = %path.as_ref().display(),
        spikes = sorted.len(),
        ?order,
        "wrote spikes"
    );
    Ok(())
}

pub fn read_spikes(path: impl AsRef<Path>) -> Result<Vec<Spike>> {
    let file = File::open(path)?;
    let root = View::new(file.root().clone());
    let gids: Vec<i32> = root.read_all("gids")?;
    let times: Vec<f64> = root.read_all("times")?;
    if gids.len() != times.len() {
        return Err(StoreError::structural(format!(
            "{}: {} gids but {} times",
            file.name(),
            gids.len(),
            times.len()
        )));
    }
    gids.into_iter()
        .zip(times)
        .map(|(gid, time)| {
            Gid::try_from(gid)
                .map(|gid| Spike { gid, time })
                .map_err(|_| {
                    StoreError::structural(format!("{}: negative gid {}", file.name(), gid))
                })
        })
        .collect()
}
