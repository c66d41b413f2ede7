//! Relative jumps against the mean of the preceding samples

use serde::Serialize;
use serde_json::{json, Value};

use crate::db::MeasurementSource;
use crate::error::Result;
use crate::models::{Device, EvaluationWindow, IssueDetail, Measurement, SortOrder};

use super::{ConfigReader, NumericSample};

const SPIKE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct RateOfChangeRule {
    pub parameter: String,
    pub ventana_muestras: usize,
    pub max_delta_pct: f64,
}

/// A reading that departed too far from its preceding window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSpike {
    pub id_dato: i64,
    pub fecha: chrono::DateTime<chrono::Utc>,
    pub valor: f64,
    pub promedio_ventana: f64,
    pub delta_pct: f64,
    pub ventana: Vec<NumericSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateOfChangeIssue {
    pub flagged_points: usize,
    /// Positive numeric readings analysed
    pub total_measurements: usize,
    pub ventana_muestras: usize,
    pub max_delta_pct: f64,
    pub spikes: Vec<RateSpike>,
}

impl RateOfChangeRule {
    pub(super) fn parse(parameter: String, config: &ConfigReader<'_>) -> Result<Self> {
        let window = config.integer("ventana_muestras")?.unwrap_or(1);
        if window < 1 {
            return Err(config.error("ventana_muestras must be at least 1"));
        }

        let max_delta_pct = config.number("max_delta_pct")?.unwrap_or(100.0);
        if max_delta_pct <= 0.0 {
            return Err(config.error("max_delta_pct must be greater than 0"));
        }

        Ok(Self {
            parameter,
            ventana_muestras: window as usize,
            max_delta_pct,
        })
    }

    pub fn config_json(&self) -> Value {
        json!({
            "ventana_muestras": self.ventana_muestras,
            "max_delta_pct": self.max_delta_pct,
        })
    }

    /// `series` is oldest first
    pub fn detect(&self, series: &[Measurement]) -> Option<RateOfChangeIssue> {
        let points: Vec<NumericSample> = series
            .iter()
            .filter_map(|m| m.numeric().filter(|v| *v > 0.0).map(|v| NumericSample::new(m, v)))
            .collect();

        let w = self.ventana_muestras;
        if points.len() < w + 1 {
            return None;
        }

        let spikes: Vec<RateSpike> = (w..points.len())
            .filter_map(|i| {
                let preceding = &points[i - w..i];
                let mean = preceding.iter().map(|p| p.valor).sum::<f64>() / w as f64;
                if mean == 0.0 {
                    return None;
                }

                let current = &points[i];
                let delta_pct = (current.valor - mean).abs() / mean * 100.0;
                (delta_pct > self.max_delta_pct).then(|| RateSpike {
                    id_dato: current.id_dato,
                    fecha: current.fecha,
                    valor: current.valor,
                    promedio_ventana: mean,
                    delta_pct,
                    ventana: preceding.to_vec(),
                })
            })
            .collect();

        if spikes.is_empty() {
            return None;
        }

        Some(RateOfChangeIssue {
            flagged_points: spikes.len(),
            total_measurements: points.len(),
            ventana_muestras: w,
            max_delta_pct: self.max_delta_pct,
            spikes: spikes.into_iter().take(SPIKE_LIMIT).collect(),
        })
    }

    pub async fn inspect(
        &self,
        source: &dyn MeasurementSource,
        device: &Device,
        window: &EvaluationWindow,
    ) -> Result<Option<IssueDetail>> {
        let series = source
            .series_for_parameter(device.id, &self.parameter, window, SortOrder::Ascending)
            .await?;

        Ok(self.detect(&series).map(IssueDetail::RateOfChangeExceeded))
    }

    pub fn title(&self, device: &Device) -> String {
        format!(
            "Alert: abrupt change in {} on device {} (over {}%)",
            self.parameter, device.code, self.max_delta_pct
        )
    }
}
