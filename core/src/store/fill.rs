use super::AdherenceStore;
use crate::{
    engine::PatientHistory,
    error::AdherenceResult,
    fill::{FillStatus, RawFill},
    types::PatientId,
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

fn status_code(status: FillStatus) -> String {
    match serde_json::to_value(status) {
        Ok(serde_json::Value::String(s)) => s,
        _ => "unknown".to_string(),
    }
}

fn parse_status(code: &str) -> FillStatus {
    serde_json::from_value(serde_json::Value::String(code.to_string()))
        .unwrap_or(FillStatus::Unknown)
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

impl AdherenceStore {
    // ── Fill history ───────────────────────────────────────────

    /// Insert or refresh a patient's enrollment facts and record its
    /// fills. Fills already on file are skipped, so saving the same
    /// history twice leaves the store unchanged. Returns the number of
    /// new fills.
    pub fn save_history(&self, history: &PatientHistory) -> AdherenceResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO patient (patient_id, enrollment_end, death_date)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(patient_id) DO UPDATE SET
                enrollment_end = excluded.enrollment_end,
                death_date     = excluded.death_date",
            params![
                history.patient_id,
                history.enrollment_end.map(|d| d.to_string()),
                history.death_date.map(|d| d.to_string()),
            ],
        )?;
        let mut inserted = 0;
        for fill in &history.fills {
            inserted += tx.execute(
                "INSERT INTO fill (
                    patient_id, drug_code, drug_name, measure_code,
                    fill_date, days_supply, status, reversed
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT DO NOTHING",
                params![
                    history.patient_id,
                    fill.drug_code,
                    fill.drug_name,
                    fill.measure_code,
                    fill.fill_date,
                    fill.days_supply,
                    status_code(fill.status),
                    fill.reversed,
                ],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn patient_ids(&self) -> AdherenceResult<Vec<PatientId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT patient_id FROM patient ORDER BY patient_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn fill_count(&self, patient_id: &str) -> AdherenceResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM fill WHERE patient_id = ?1",
            params![patient_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Full history, fills in dispense order.
    pub fn load_history(&self, patient_id: &str) -> AdherenceResult<Option<PatientHistory>> {
        self.load_history_filtered(patient_id, None)
    }

    /// History restricted to fills dated within `[from, to]`.
    pub fn load_history_between(
        &self,
        patient_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AdherenceResult<Option<PatientHistory>> {
        self.load_history_filtered(patient_id, Some((from, to)))
    }

    pub fn load_all_histories(&self) -> AdherenceResult<Vec<PatientHistory>> {
        let mut out = Vec::new();
        for id in self.patient_ids()? {
            if let Some(history) = self.load_history(&id)? {
                out.push(history);
            }
        }
        Ok(out)
    }

    fn load_history_filtered(
        &self,
        patient_id: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> AdherenceResult<Option<PatientHistory>> {
        let patient: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT enrollment_end, death_date FROM patient WHERE patient_id = ?1",
                params![patient_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((enrollment_end, death_date)) = patient else {
            return Ok(None);
        };

        // ISO dates compare correctly as text; anything else falls
        // outside a range and is still returned by an unranged load.
        let (from, to) = match range {
            Some((f, t)) => (f.to_string(), format!("{t}\u{10FFFF}")),
            None => (String::new(), "\u{10FFFF}".to_string()),
        };

        let mut stmt = self.conn.prepare(
            "SELECT drug_code, drug_name, measure_code, fill_date, days_supply, status, reversed
             FROM fill
             WHERE patient_id = ?1 AND fill_date >= ?2 AND fill_date <= ?3
             ORDER BY fill_date ASC, id ASC",
        )?;
        let fills = stmt
            .query_map(params![patient_id, from, to], |row| {
                let status: String = row.get(5)?;
                Ok(RawFill {
                    drug_code:    row.get(0)?,
                    drug_name:    row.get(1)?,
                    measure_code: row.get(2)?,
                    fill_date:    row.get(3)?,
                    days_supply:  row.get(4)?,
                    status:       parse_status(&status),
                    reversed:     row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PatientHistory {
            patient_id: patient_id.to_string(),
            fills,
            enrollment_end: parse_date(enrollment_end),
            death_date: parse_date(death_date),
        }))
    }
}
