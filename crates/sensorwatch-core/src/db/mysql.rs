//! MySQL measurement store

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, QueryBuilder, Row};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::models::{
    Device, DeviceFilter, EvaluationWindow, Measurement, PairedMeasurement, SortOrder,
};

use super::MeasurementSource;

/// Measurement queries over the `datos` / `dispositivos` sensor schema
#[derive(Clone)]
pub struct MySqlMeasurementStore {
    pool: MySqlPool,
    schema: String,
}

impl MySqlMeasurementStore {
    /// Connect a new pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let schema = checked_schema(&config.schema)?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self { pool, schema })
    }

    /// Wrap an existing pool
    pub fn with_pool(pool: MySqlPool, schema: &str) -> Result<Self> {
        Ok(Self {
            pool,
            schema: checked_schema(schema)?,
        })
    }

    /// Readings of one parameter on one device, joined through the sensor
    /// tables; binds: device id, parameter label, window start, window end
    fn measurement_select(&self) -> String {
        let s = &self.schema;
        format!(
            r#"
            SELECT CAST(d.id_dato AS SIGNED) AS id_dato,
                   d.fecha AS fecha,
                   CAST(d.valor AS CHAR) AS valor
            FROM {s}.datos AS d
            LEFT JOIN {s}.variables AS v ON d.id_variable = v.id_variable
            LEFT JOIN {s}.sensores AS sens ON d.id_sensor = sens.id_sensor
            LEFT JOIN {s}.sensores_tipo AS st ON sens.id_sensor_tipo = st.id_sensor_tipo
            LEFT JOIN {s}.sensores_en_dispositivo AS sed ON sens.id_sensor = sed.id_sensor
            LEFT JOIN {s}.dispositivos AS disp ON sed.id_dispositivo = disp.id_dispositivo
            WHERE disp.id_dispositivo = ?
              AND CONCAT(st.modelo, ' [', v.descripcion, ' (', v.unidad, ')]') = ?
              AND d.fecha >= ? AND d.fecha <= ?
            "#
        )
    }
}

#[async_trait]
impl MeasurementSource for MySqlMeasurementStore {
    async fn query_devices(&self, project_id: &str, filter: &DeviceFilter) -> Result<Vec<Device>> {
        let mut query = QueryBuilder::<MySql>::new(format!(
            "SELECT CAST(id_dispositivo AS SIGNED) AS id_dispositivo, \
             CAST(codigo_interno AS CHAR) AS codigo_interno \
             FROM {}.dispositivos WHERE id_proyecto = ",
            self.schema
        ));
        query.push_bind(project_id.to_owned());

        if let DeviceFilter::Codes(codes) = filter {
            if codes.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" AND codigo_interno IN (");
            let mut list = query.separated(", ");
            for code in codes {
                list.push_bind(code.clone());
            }
            list.push_unseparated(")");
        }
        query.push(" ORDER BY id_dispositivo");

        let rows = query.build().fetch_all(&self.pool).await?;

        let devices = rows
            .iter()
            .map(|row| -> std::result::Result<Device, sqlx::Error> {
                Ok(Device {
                    id: row.try_get("id_dispositivo")?,
                    code: row
                        .try_get::<Option<String>, _>("codigo_interno")?
                        .unwrap_or_default(),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(project_id, count = devices.len(), "Resolved project devices");
        Ok(devices)
    }

    async fn series_for_parameter(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
        order: SortOrder,
    ) -> Result<Vec<Measurement>> {
        let direction = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let sql = format!(
            "{} ORDER BY d.fecha {direction}, d.id_dato {direction}",
            self.measurement_select()
        );

        let rows = sqlx::query(&sql)
            .bind(device_id)
            .bind(parameter)
            .bind(window.start.naive_utc())
            .bind(window.end.naive_utc())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_measurement).collect()
    }

    async fn count_all(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
    ) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM ({}) AS series",
            self.measurement_select()
        );

        let row = sqlx::query(&sql)
            .bind(device_id)
            .bind(parameter)
            .bind(window.start.naive_utc())
            .bind(window.end.naive_utc())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("total")?)
    }

    async fn paired_series(
        &self,
        device_id: i64,
        left: &str,
        right: &str,
        window: &EvaluationWindow,
    ) -> Result<Vec<PairedMeasurement>> {
        let select = self.measurement_select();
        let sql = format!(
            r#"
            SELECT l.fecha AS fecha,
                   l.valor AS valor_izq, r.valor AS valor_der,
                   l.id_dato AS id_izq, r.id_dato AS id_der
            FROM ({select}) AS l
            INNER JOIN ({select}) AS r ON l.fecha = r.fecha
            ORDER BY l.fecha ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(device_id)
            .bind(left)
            .bind(window.start.naive_utc())
            .bind(window.end.naive_utc())
            .bind(device_id)
            .bind(right)
            .bind(window.start.naive_utc())
            .bind(window.end.naive_utc())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<PairedMeasurement> {
                Ok(PairedMeasurement {
                    timestamp: row.try_get::<NaiveDateTime, _>("fecha")?.and_utc(),
                    left_value: row.try_get("valor_izq")?,
                    right_value: row.try_get("valor_der")?,
                    left_id: row.try_get("id_izq")?,
                    right_id: row.try_get("id_der")?,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_measurement(row: &MySqlRow) -> Result<Measurement> {
    Ok(Measurement {
        id: row.try_get("id_dato")?,
        timestamp: row.try_get::<NaiveDateTime, _>("fecha")?.and_utc(),
        value: row.try_get("valor")?,
    })
}

/// Schema names are interpolated into SQL, so only plain identifiers pass
fn checked_schema(schema: &str) -> Result<String> {
    let valid = !schema.is_empty()
        && schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(schema.to_string())
    } else {
        Err(Error::config(format!("invalid database schema name: {schema:?}")))
    }
}
