//! Size catalog
//!
//! An ordered list of size tiers, smallest first. Neighbours are found by
//! index, so a tier's next and previous sizes always exist in the catalog.
//!
//! Capacity ceilings are provider and region specific and have to be
//! refreshed by hand when the quoted IOPS limits change.

use crate::error::CatalogError;
use crate::models::{DISK_PARTITION_IOPS_READ, DISK_PARTITION_IOPS_TOTAL, DISK_PARTITION_IOPS_WRITE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-metric IOPS ceilings of a size tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IopsCapacity {
    pub read: f64,
    pub write: f64,
    pub total: f64,
}

/// One provisioned size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeTier {
    pub name: String,
    pub cpus: u32,
    pub ram_gb: f64,
    pub max_disk_size_gb: u32,
    pub iops: IopsCapacity,
}

impl SizeTier {
    pub fn new(name: impl Into<String>, cpus: u32, ram_gb: f64, max_disk_size_gb: u32, iops: IopsCapacity) -> Self {
        Self {
            name: name.into(),
            cpus,
            ram_gb,
            max_disk_size_gb,
            iops,
        }
    }

    /// Capacity ceiling for a metric, if the tier defines one
    pub fn ceiling(&self, metric: &str) -> Option<f64> {
        match metric {
            DISK_PARTITION_IOPS_READ => Some(self.iops.read),
            DISK_PARTITION_IOPS_WRITE => Some(self.iops.write),
            DISK_PARTITION_IOPS_TOTAL => Some(self.iops.total),
            _ => None,
        }
    }
}

/// Ordered catalog of size tiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeCatalog {
    tiers: Vec<SizeTier>,
}

/// A catalog hit: the tier plus its position for neighbour lookup
#[derive(Debug, Clone, Copy)]
pub struct TierEntry<'a> {
    catalog: &'a SizeCatalog,
    index: usize,
}

impl<'a> TierEntry<'a> {
    pub fn tier(&self) -> &'a SizeTier {
        &self.catalog.tiers[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &'a str {
        &self.tier().name
    }

    pub fn ceiling(&self, metric: &str) -> Option<f64> {
        self.tier().ceiling(metric)
    }

    /// Next larger size, if any
    pub fn next(&self) -> Option<&'a str> {
        self.catalog
            .tiers
            .get(self.index + 1)
            .map(|t| t.name.as_str())
    }

    /// Next smaller size, if any
    pub fn prev(&self) -> Option<&'a str> {
        self.index
            .checked_sub(1)
            .and_then(|i| self.catalog.tiers.get(i))
            .map(|t| t.name.as_str())
    }
}

impl SizeCatalog {
    /// Build a catalog from tiers ordered smallest first
    pub fn new(tiers: Vec<SizeTier>) -> Result<Self, CatalogError> {
        if tiers.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        for tier in &tiers {
            if tier.name.is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if !seen.insert(tier.name.as_str()) {
                return Err(CatalogError::DuplicateSize(tier.name.clone()));
            }
        }

        Ok(Self { tiers })
    }

    /// GCP size matrix for Frankfurt as of 2021-02-19
    pub fn gcp_frankfurt() -> Self {
        let tier = |name: &str, cpus, ram_gb, max_disk, read, write, total| {
            SizeTier::new(name, cpus, ram_gb, max_disk, IopsCapacity { read, write, total })
        };

        Self {
            tiers: vec![
                tier("M30", 2, 7.5, 512, 1200.0, 1200.0, 2400.0),
                tier("M40", 4, 15.0, 1024, 2400.0, 2400.0, 4800.0),
                tier("M50", 8, 30.0, 4096, 4800.0, 4800.0, 9000.0),
                tier("M60", 16, 60.0, 4096, 9600.0, 9600.0, 19200.0),
                tier("M80", 32, 120.0, 4096, 22500.0, 22500.0, 45000.0),
                tier("M200", 64, 240.0, 4096, 45000.0, 45000.0, 90000.0),
                tier("M300", 96, 360.0, 4096, 60000.0, 60000.0, 100000.0),
            ],
        }
    }

    /// Look up a size by name
    pub fn lookup(&self, name: &str) -> Option<TierEntry<'_>> {
        self.tiers
            .iter()
            .position(|t| t.name == name)
            .map(|index| TierEntry {
                catalog: self,
                index,
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn tiers(&self) -> &[SizeTier] {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for SizeCatalog {
    fn default() -> Self {
        Self::gcp_frankfurt()
    }
}
