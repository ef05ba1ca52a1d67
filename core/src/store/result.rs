use super::AdherenceStore;
use crate::{
    adapter::{self, AdherenceObservation, ResultScope},
    engine::PatientReport,
    error::{AdherenceError, AdherenceResult},
};
use rusqlite::{params, OptionalExtension};

fn scope_code(scope: ResultScope) -> &'static str {
    match scope {
        ResultScope::Measure    => "measure",
        ResultScope::Medication => "medication",
    }
}

impl AdherenceStore {
    // ── Adherence results ──────────────────────────────────────

    /// Version of the current pointer for a key, None if never published.
    pub fn current_version(&self, patient_id: &str, result_key: &str) -> AdherenceResult<Option<i64>> {
        let v = self
            .conn
            .query_row(
                "SELECT version FROM result_pointer WHERE patient_id = ?1 AND result_key = ?2",
                params![patient_id, result_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v)
    }

    /// Publish against whatever version is current right now.
    pub fn publish_result(&self, run_id: &str, obs: &AdherenceObservation) -> AdherenceResult<String> {
        let expected = self.current_version(&obs.patient_id, &obs.result_key)?;
        self.publish_result_if(run_id, obs, expected)
    }

    /// Insert `obs` as the new current result for its key, provided the
    /// pointer is still at `expected`. On a lost race nothing is written
    /// and `StaleCurrentPointer` is returned; the caller may reload the
    /// version and retry, since results are full recomputations.
    pub fn publish_result_if(
        &self,
        run_id: &str,
        obs: &AdherenceObservation,
        expected: Option<i64>,
    ) -> AdherenceResult<String> {
        let result_id = uuid::Uuid::new_v4().to_string();
        let mut row = obs.clone();
        row.is_current = true;
        let payload = serde_json::to_string(&row)?;

        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE adherence_result SET is_current = 0
             WHERE patient_id = ?1 AND result_key = ?2 AND is_current = 1",
            params![obs.patient_id, obs.result_key],
        )?;

        tx.execute(
            "INSERT INTO adherence_result (
                result_id, run_id, patient_id, result_key, scope, measure,
                as_of, tier, priority, is_current, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)",
            params![
                result_id,
                run_id,
                obs.patient_id,
                obs.result_key,
                scope_code(obs.scope),
                obs.measure_code.code(),
                obs.as_of.to_string(),
                obs.fragility_tier.map(|t| t.code()),
                obs.priority_score,
                payload,
            ],
        )?;

        let swapped = match expected {
            None => tx.execute(
                "INSERT INTO result_pointer (patient_id, result_key, result_id, version)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(patient_id, result_key) DO NOTHING",
                params![obs.patient_id, obs.result_key, result_id],
            )?,
            Some(version) => tx.execute(
                "UPDATE result_pointer SET result_id = ?3, version = version + 1
                 WHERE patient_id = ?1 AND result_key = ?2 AND version = ?4",
                params![obs.patient_id, obs.result_key, result_id, version],
            )?,
        };

        if swapped == 0 {
            // Dropping the transaction rolls back the demotion and insert.
            return Err(AdherenceError::StaleCurrentPointer {
                patient_id: obs.patient_id.clone(),
                result_key: obs.result_key.clone(),
                expected:   expected.unwrap_or(0),
            });
        }

        tx.commit()?;
        Ok(result_id)
    }

    /// Publish every measure and medication observation of a report.
    pub fn publish_report(&self, run_id: &str, report: &PatientReport) -> AdherenceResult<usize> {
        let observations = adapter::observations(report);
        for obs in &observations {
            self.publish_result(run_id, obs)?;
        }
        Ok(observations.len())
    }

    pub fn current_result(
        &self,
        patient_id: &str,
        result_key: &str,
    ) -> AdherenceResult<Option<AdherenceObservation>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT r.payload
                 FROM result_pointer p
                 JOIN adherence_result r ON r.result_id = p.result_id
                 WHERE p.patient_id = ?1 AND p.result_key = ?2",
                params![patient_id, result_key],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(AdherenceError::from))
            .transpose()
    }

    pub fn current_results_for_patient(
        &self,
        patient_id: &str,
    ) -> AdherenceResult<Vec<AdherenceObservation>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.payload
             FROM result_pointer p
             JOIN adherence_result r ON r.result_id = p.result_id
             WHERE p.patient_id = ?1
             ORDER BY p.result_key ASC",
        )?;
        let payloads = stmt
            .query_map(params![patient_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(AdherenceError::from))
            .collect()
    }

    /// Rows flagged current for a key. Exactly one after any publish.
    pub fn current_flag_count(&self, patient_id: &str, result_key: &str) -> AdherenceResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM adherence_result
             WHERE patient_id = ?1 AND result_key = ?2 AND is_current = 1",
            params![patient_id, result_key],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn result_history_count(&self, patient_id: &str, result_key: &str) -> AdherenceResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM adherence_result WHERE patient_id = ?1 AND result_key = ?2",
            params![patient_id, result_key],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
