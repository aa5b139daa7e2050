//! Hand-curated per-cell data fixes.
//!
//! These tables encode knowledge about specific public datasets that cannot
//! be derived from the data: cells to skip entirely, MATR cells whose test
//! continued in a later batch, and per-cell cleaning exclusions. They are
//! versioned so a batch manifest records which revision produced its output.

use cdt_algo::{CapacityFloor, Exclusions};

pub const OVERRIDES_VERSION: u32 = 1;

/// A MATR batch-1 cell whose test continued as a batch-2 cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Continuation {
    pub head: &'static str,
    pub tail: &'static str,
    /// Cycles added to the head's recorded cycle life.
    pub cycle_life_extension: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellExclusion {
    /// Raw cell name, without the dataset prefix.
    pub cell: &'static str,
    pub exclude_first_cycle: bool,
    pub capacity_floor: Option<CapacityFloor>,
    pub drop_leading_clean: usize,
}

impl CellExclusion {
    const fn new(cell: &'static str) -> Self {
        Self {
            cell,
            exclude_first_cycle: false,
            capacity_floor: None,
            drop_leading_clean: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overrides {
    pub version: u32,
    /// SNL cells left out of the processed corpus.
    pub snl_dropped: &'static [&'static str],
    pub continuations: &'static [Continuation],
    pub exclusions: &'static [CellExclusion],
}

const SNL_DROPPED: &[&str] = &[
    "SNL_18650_NMC_25C_20-80_0.5-0.5C_d",
    "SNL_18650_LFP_25C_20-80_0.5-3C_a",
    "SNL_18650_NMC_25C_20-80_0.5-0.5C_a",
    "SNL_18650_LFP_25C_40-60_0.5-3C_b",
    "SNL_18650_NMC_25C_40-60_0.5-0.5C_a",
    "SNL_18650_LFP_25C_40-60_0.5-3C_a",
    "SNL_18650_NMC_25C_40-60_0.5-0.5C_b",
    "SNL_18650_LFP_15C_0-100_0.5-1C_a",
    "SNL_18650_LFP_25C_20-80_0.5-0.5C_b",
    "SNL_18650_LFP_15C_0-100_0.5-1C_b",
    "SNL_18650_NMC_25C_20-80_0.5-3C_a",
    "SNL_18650_LFP_15C_0-100_0.5-2C_a",
    "SNL_18650_LFP_25C_40-60_0.5-0.5C_b",
    "SNL_18650_LFP_25C_20-80_0.5-0.5C_c",
    "SNL_18650_LFP_25C_40-60_0.5-0.5C_a",
    "SNL_18650_LFP_25C_20-80_0.5-0.5C_d",
    "SNL_18650_LFP_25C_20-80_0.5-0.5C_a",
    "SNL_18650_NMC_25C_0-100_0.5-0.5C_a",
    "SNL_18650_NCA_25C_40-60_0.5-0.5C_a",
    "SNL_18650_NMC_25C_40-60_0.5-3C_a",
    "SNL_18650_NMC_25C_20-80_0.5-0.5C_b",
    "SNL_18650_NMC_25C_40-60_0.5-3C_b",
    "SNL_18650_NMC_25C_20-80_0.5-0.5C_c",
    "SNL_18650_NCA_25C_40-60_0.5-0.5C_b",
    "SNL_18650_NMC_25C_20-80_0.5-3C_b",
];

const CONTINUATIONS: &[Continuation] = &[
    Continuation {
        head: "b1c0",
        tail: "b2c7",
        cycle_life_extension: 662.0,
    },
    Continuation {
        head: "b1c1",
        tail: "b2c8",
        cycle_life_extension: 981.0,
    },
    Continuation {
        head: "b1c2",
        tail: "b2c9",
        cycle_life_extension: 1060.0,
    },
    Continuation {
        head: "b1c3",
        tail: "b2c15",
        cycle_life_extension: 208.0,
    },
    Continuation {
        head: "b1c4",
        tail: "b2c16",
        cycle_life_extension: 482.0,
    },
];

const EXCLUSIONS: &[CellExclusion] = &[
    CellExclusion {
        exclude_first_cycle: true,
        ..CellExclusion::new("CX2_34")
    },
    CellExclusion {
        drop_leading_clean: 1,
        ..CellExclusion::new("CX2_16")
    },
    CellExclusion {
        capacity_floor: Some(CapacityFloor::Below(1.5)),
        ..CellExclusion::new("SNL_18650_NCA_25C_0-100_0.5-0.5C_a")
    },
];

impl Overrides {
    pub const DEFAULT: Overrides = Overrides {
        version: OVERRIDES_VERSION,
        snl_dropped: SNL_DROPPED,
        continuations: CONTINUATIONS,
        exclusions: EXCLUSIONS,
    };

    pub fn is_snl_dropped(&self, cell: &str) -> bool {
        self.snl_dropped.contains(&cell)
    }

    /// Continuation whose tail is `key`, if the cell only exists to extend
    /// another one.
    pub fn continuation_of(&self, key: &str) -> Option<&Continuation> {
        self.continuations.iter().find(|c| c.tail == key)
    }

    pub fn continuation_for(&self, head: &str) -> Option<&Continuation> {
        self.continuations.iter().find(|c| c.head == head)
    }

    /// Cleaning exclusions for a raw cell name, case-insensitive.
    pub fn exclusions_for(&self, cell: &str) -> Exclusions {
        self.exclusions
            .iter()
            .find(|e| e.cell.eq_ignore_ascii_case(cell))
            .map(|e| Exclusions {
                exclude_first_cycle: e.exclude_first_cycle,
                capacity_floor: e.capacity_floor,
                drop_leading_clean: e.drop_leading_clean,
            })
            .unwrap_or_default()
    }
}

impl Default for Overrides {
    fn default() -> Self {
        Self::DEFAULT
    }
}
