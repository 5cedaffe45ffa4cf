//! Resource tiers

use std::collections::BTreeMap;

use crate::manifest::objects::ResourceRequirements;
use crate::models::ResourceSize;

/// CPU of tier "1x", in millicores
pub const BASE_CPU_MILLIS: u64 = 20;

/// Memory of tier "1x", in MiB
pub const BASE_MEMORY_MIB: u64 = 32;

/// Requests and limits of a tier. Limits equal requests; "none" is unbounded.
pub fn requirements(size: ResourceSize) -> ResourceRequirements {
    let Some(multiplier) = size.multiplier() else {
        return ResourceRequirements::default();
    };

    let quantities = BTreeMap::from([
        ("cpu".to_string(), format!("{}m", BASE_CPU_MILLIS * multiplier)),
        (
            "memory".to_string(),
            format!("{}Mi", BASE_MEMORY_MIB * multiplier),
        ),
    ]);

    ResourceRequirements {
        requests: quantities.clone(),
        limits: quantities,
    }
}
