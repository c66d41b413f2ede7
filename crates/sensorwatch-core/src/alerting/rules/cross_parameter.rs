//! Relation between two parameters read at the same instant

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::MeasurementSource;
use crate::error::Result;
use crate::models::{Device, EvaluationWindow, IssueDetail, PairedMeasurement};

use super::{ConfigReader, Operator};

const EXAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct CrossParameterRule {
    pub izq: String,
    pub der: String,
    pub relacion: Operator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairViolation {
    pub fecha: DateTime<Utc>,
    pub valor_izq: f64,
    pub valor_der: f64,
    pub id_izq: i64,
    pub id_der: i64,
    pub cumple_relacion: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossParameterIssue {
    pub violations: usize,
    /// Timestamps present for both parameters
    pub total_pairs: usize,
    /// Pairs where both sides were numeric
    pub pairs_evaluated: usize,
    pub izq: String,
    pub der: String,
    pub relacion: Operator,
    pub violating_pairs: Vec<PairViolation>,
}

impl CrossParameterRule {
    pub(super) fn parse(config: &ConfigReader<'_>) -> Result<Self> {
        let izq = config
            .text("izq")?
            .ok_or_else(|| config.error("izq is required"))?;
        let der = config
            .text("der")?
            .ok_or_else(|| config.error("der is required"))?;
        if izq == der {
            return Err(config.error("izq and der must be different parameters"));
        }
        let relacion = config
            .operator("relacion")?
            .ok_or_else(|| config.error("relacion is required"))?;

        Ok(Self {
            izq: izq.to_string(),
            der: der.to_string(),
            relacion,
        })
    }

    pub fn config_json(&self) -> Value {
        json!({ "izq": self.izq, "der": self.der, "relacion": self.relacion })
    }

    /// Pairs where `izq <relacion> der` does not hold
    pub fn detect(&self, pairs: &[PairedMeasurement]) -> Option<CrossParameterIssue> {
        let numeric: Vec<(&PairedMeasurement, f64, f64)> = pairs
            .iter()
            .filter_map(|p| p.numeric_pair().map(|(l, r)| (p, l, r)))
            .collect();

        let violations: Vec<PairViolation> = numeric
            .iter()
            .filter(|(_, left, right)| !self.relacion.holds(*left, *right))
            .map(|(pair, left, right)| PairViolation {
                fecha: pair.timestamp,
                valor_izq: *left,
                valor_der: *right,
                id_izq: pair.left_id,
                id_der: pair.right_id,
                cumple_relacion: false,
            })
            .collect();

        if violations.is_empty() {
            return None;
        }

        Some(CrossParameterIssue {
            violations: violations.len(),
            total_pairs: pairs.len(),
            pairs_evaluated: numeric.len(),
            izq: self.izq.clone(),
            der: self.der.clone(),
            relacion: self.relacion,
            violating_pairs: violations.into_iter().take(EXAMPLE_LIMIT).collect(),
        })
    }

    pub async fn inspect(
        &self,
        source: &dyn MeasurementSource,
        device: &Device,
        window: &EvaluationWindow,
    ) -> Result<Option<IssueDetail>> {
        let pairs = source
            .paired_series(device.id, &self.izq, &self.der, window)
            .await?;

        Ok(self.detect(&pairs).map(IssueDetail::CrossParameterViolation))
    }

    pub fn title(&self, device: &Device) -> String {
        format!(
            "Alert: relation {} {} {} violated on device {}",
            self.izq, self.relacion, self.der, device.code
        )
    }
}
