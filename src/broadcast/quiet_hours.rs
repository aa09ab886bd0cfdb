// src/broadcast/quiet_hours.rs
//! Quiet-hours gate, evaluated on the local hour of the cycle.

use crate::article::{Article, ImpactCategory};
use crate::config::{QuietHoursConfig, QuietHoursException};

pub trait QuietHoursPolicy: Send + Sync {
    fn is_quiet(&self, hour: u32) -> bool;
    /// Whether `article` may go out at local `hour`.
    fn allows(&self, article: &Article, hour: u32) -> bool;
}

/// Wrap-around hour window (e.g. 22→6) with a configurable exception.
#[derive(Debug, Clone, Copy)]
pub struct WindowPolicy {
    config: QuietHoursConfig,
}

impl WindowPolicy {
    pub fn new(config: QuietHoursConfig) -> Self {
        Self { config }
    }
}

impl QuietHoursPolicy for WindowPolicy {
    fn is_quiet(&self, hour: u32) -> bool {
        let QuietHoursConfig {
            enabled, start, end, ..
        } = self.config;
        if !enabled || start == end {
            return false;
        }
        if start < end {
            (start..end).contains(&hour)
        } else {
            hour >= start || hour < end
        }
    }

    fn allows(&self, article: &Article, hour: u32) -> bool {
        if !self.is_quiet(hour) {
            return true;
        }
        match self.config.exception {
            QuietHoursException::AlwaysSend => true,
            QuietHoursException::ExtremeOnly => article.has_extreme_keyword,
            QuietHoursException::HighOnly => article.impact_category == ImpactCategory::High,
            QuietHoursException::Never => false,
        }
    }
}
