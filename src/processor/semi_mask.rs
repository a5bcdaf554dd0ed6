use crate::common::NodeOffset;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Bitset over a label's node offsets, populated by one pipeline to prune
/// another pipeline's scan. Until enabled, every offset passes.
pub struct NodeSemiMask {
    enabled: AtomicBool,
    bits: RwLock<Vec<bool>>,
}

impl NodeSemiMask {
    pub fn new(num_nodes: u64) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            bits: RwLock::new(vec![false; num_nodes as usize]),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn mark(&self, offset: NodeOffset) {
        let mut bits = self.bits.write();
        if (offset as usize) < bits.len() {
            bits[offset as usize] = true;
        }
    }

    pub fn allows(&self, offset: NodeOffset) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.bits.read().get(offset as usize).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_mask_allows_everything() {
        let mask = NodeSemiMask::new(4);
        assert!(mask.allows(0) && mask.allows(3));
    }

    #[test]
    fn enabled_mask_restricts_to_marked() {
        let mask = NodeSemiMask::new(4);
        mask.mark(2);
        mask.enable();
        assert!(!mask.allows(0));
        assert!(mask.allows(2));
        assert!(!mask.allows(7));
    }
}
