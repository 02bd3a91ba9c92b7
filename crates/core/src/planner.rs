//! Part planning
//!
//! Splits an object of `total` bytes into contiguous, non-overlapping parts.
//! Planning is pure and deterministic: a resumed checkpoint is checked
//! against a freshly computed plan, so identical inputs must always produce
//! an identical plan.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of parts a multipart session may contain
pub const MAX_PARTS: u64 = 10_000;

/// Default requested part size (8 MiB)
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// A contiguous byte range handled as one transfer unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRange {
    /// 1-based part number
    pub part_number: u32,
    /// Absolute offset of the first byte
    pub offset: u64,
    /// Length in bytes
    pub size: u64,
}

impl PartRange {
    /// Offset of the last byte (inclusive)
    ///
    /// Only meaningful for non-empty parts.
    pub fn end(&self) -> u64 {
        self.offset + self.size.saturating_sub(1)
    }
}

/// Ordered list of parts plus the part size actually used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    /// Effective part size, after adjusting for [`MAX_PARTS`]
    pub part_size: u64,
    pub parts: Vec<PartRange>,
}

impl PartPlan {
    /// Sum of all part sizes
    pub fn total_size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }
}

/// Plan an upload of `total` bytes starting at `origin_offset` in the source
///
/// An empty upload yields exactly one zero-size part so the remote object
/// still receives one write.
pub fn plan_upload(total: u64, requested_part_size: u64, origin_offset: u64) -> Result<PartPlan> {
    let mut plan = plan(total, requested_part_size, origin_offset)?;
    if plan.parts.is_empty() {
        plan.parts.push(PartRange {
            part_number: 1,
            offset: origin_offset,
            size: 0,
        });
    }
    Ok(plan)
}

/// Plan a download of an object of `total` bytes
///
/// An empty object yields no parts at all.
pub fn plan_download(total: u64, requested_part_size: u64) -> Result<PartPlan> {
    plan(total, requested_part_size, 0)
}

fn plan(total: u64, requested_part_size: u64, origin_offset: u64) -> Result<PartPlan> {
    if requested_part_size == 0 {
        return Err(Error::Validation("part size must be greater than zero".into()));
    }

    let mut part_size = requested_part_size;
    let mut count = total / part_size;
    if count >= MAX_PARTS {
        part_size = total.div_ceil(MAX_PARTS);
        count = total / part_size;
    }
    if total % part_size > 0 {
        count += 1;
    }

    let mut parts = Vec::with_capacity(count as usize);
    for index in 0..count {
        let start = index * part_size;
        let size = part_size.min(total - start);
        parts.push(PartRange {
            part_number: (index + 1) as u32,
            offset: origin_offset + start,
            size,
        });
    }

    Ok(PartPlan { part_size, parts })
}
