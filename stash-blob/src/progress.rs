use serde::{Deserialize, Serialize};

/// Byte-level progress of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub bytes_loaded: u64,
    pub bytes_total: u64,
    /// 0..=100, two decimals.
    pub percentage: f64,
}

impl TransferProgress {
    pub fn new(bytes_total: u64) -> Self {
        Self {
            bytes_loaded: 0,
            bytes_total,
            percentage: 0.0,
        }
    }

    /// Apply a "`loaded` bytes so far" tick.
    ///
    /// Ticks that would move backwards are ignored, so the loaded count and
    /// the percentage never decrease.
    pub fn advance(&mut self, loaded: u64) {
        if loaded < self.bytes_loaded {
            return;
        }
        self.bytes_loaded = loaded;
        self.percentage = percentage(loaded, self.bytes_total);
    }

    /// Mark the transfer as fully delivered.
    pub fn complete(&mut self) {
        self.bytes_loaded = self.bytes_loaded.max(self.bytes_total);
        self.percentage = 100.0;
    }

    pub fn is_complete(&self) -> bool {
        self.percentage >= 100.0
    }
}

/// `loaded / total` as a percentage rounded to two decimals and clamped to
/// `[0, 100]`. An unknown (zero) total reads as 0.
pub fn percentage(loaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = loaded as f64 / total as f64 * 100.0;
    ((raw * 100.0).round() / 100.0).clamp(0.0, 100.0)
}
