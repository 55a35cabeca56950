//! Reader for SONATA-style network descriptions: node and edge populations
//! spread over many files, addressed through one global id space and
//! resolved into per-cell connectivity.

pub mod config;
pub mod dataset;
pub mod dynamics;
pub mod element;
pub mod error;
pub mod file;
pub mod group;
pub mod inputs;
pub mod model;
pub mod range_index;
pub mod record;
pub mod spikes;
pub mod storage;
pub mod types;
pub mod view;

pub use config::{CircuitConfig, InputConfig, NetworkParams, NodeSet, SimulationConfig};
pub use dataset::Dataset;
pub use dynamics::{DynamicsCatalog, DynamicsSource, MechanismDesc, SectionKind};
pub use error::{Result, StoreError};
pub use file::File;
pub use group::Group;
pub use inputs::{read_current_clamps, CurrentClamp, IoDescription, SpikeInput};
pub use model::{CellKind, Connection, Location, ModelDescription, SourcesAndTargets, TargetSite};
pub use range_index::RangeIndex;
pub use record::{Gid, LocalElement, PartitionedRecord};
pub use spikes::{read_spikes, write_spikes, SortOrder, Spike};
pub use types::{CsvTypeTable, TypeRow, TypeTable};
pub use view::View;
