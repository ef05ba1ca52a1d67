//! Seeded synthetic patient cohorts for regression runs and tests.
//!
//! RULE: Nothing here may call a platform RNG. Each patient gets its
//! own Pcg64Mcg stream derived from (master_seed XOR index·φ), so
//! growing the cohort never changes the histories already generated.

use crate::{
    clock::AsOfClock,
    engine::PatientHistory,
    fill::{FillStatus, RawFill},
    measure::Measure,
};
use chrono::{Duration, NaiveDate};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A deterministic RNG for one synthetic patient.
pub struct CohortRng {
    inner: Pcg64Mcg,
}

impl CohortRng {
    pub fn new(master_seed: u64, stream: u64) -> Self {
        let derived_seed = master_seed ^ (stream.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self { inner: Pcg64Mcg::seed_from_u64(derived_seed) }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.next_u64_below(items.len() as u64) as usize]
    }
}

/// (measure, RxNorm code, display name) drawn for synthetic fills.
const DRUG_CATALOG: &[(Measure, &str, &str)] = &[
    (Measure::Mac, "83367",  "atorvastatin 40 MG Oral Tablet"),
    (Measure::Mac, "36567",  "simvastatin 20 MG Oral Tablet"),
    (Measure::Mac, "301542", "rosuvastatin 10 MG Oral Tablet"),
    (Measure::Mad, "6809",   "metformin 500 MG Oral Tablet"),
    (Measure::Mad, "4821",   "glipizide 5 MG Oral Tablet"),
    (Measure::Mad, "593411", "sitagliptin 100 MG Oral Tablet"),
    (Measure::Mah, "29046",  "lisinopril 10 MG Oral Tablet"),
    (Measure::Mah, "52175",  "losartan 50 MG Oral Tablet"),
    (Measure::Mah, "69749",  "valsartan 80 MG Oral Tablet"),
];

/// How the generated patient refills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillHabit {
    Punctual,
    Drifting,
    Lapsing,
    SingleFill,
}

pub struct SyntheticCohort {
    pub seed:     u64,
    pub patients: usize,
    pub clock:    AsOfClock,
}

impl SyntheticCohort {
    pub fn new(seed: u64, patients: usize, clock: AsOfClock) -> Self {
        Self { seed, patients, clock }
    }

    pub fn generate(&self) -> Vec<PatientHistory> {
        (0..self.patients).map(|i| self.patient(i)).collect()
    }

    pub fn patient(&self, index: usize) -> PatientHistory {
        let mut rng = CohortRng::new(self.seed, index as u64);
        let patient_id = format!("p-{index:06}");

        let mut measures: Vec<Measure> = Measure::ALL
            .iter()
            .copied()
            .filter(|_| rng.chance(0.5))
            .collect();
        if measures.is_empty() {
            measures.push(*rng.pick(&Measure::ALL));
        }

        let habit = match rng.next_u64_below(10) {
            0..=3 => RefillHabit::Punctual,
            4..=6 => RefillHabit::Drifting,
            7..=8 => RefillHabit::Lapsing,
            _ => RefillHabit::SingleFill,
        };

        let mut fills = Vec::new();
        for measure in measures {
            let options: Vec<&(Measure, &str, &str)> =
                DRUG_CATALOG.iter().filter(|(m, _, _)| *m == measure).collect();
            let (_, code, name) = **rng.pick(&options);
            fills.extend(self.fills_for_drug(&mut rng, habit, code, name));
        }

        PatientHistory::new(&patient_id, fills)
    }

    fn fills_for_drug(
        &self,
        rng: &mut CohortRng,
        habit: RefillHabit,
        code: &str,
        name: &str,
    ) -> Vec<RawFill> {
        let year_start = self.clock.year_start();
        let window = (self.clock.as_of - year_start).num_days().max(1) as u64;
        let mut date: NaiveDate = year_start + Duration::days(rng.next_u64_below(window.min(200)) as i64);
        let days_supply: i64 = if rng.chance(0.25) { 90 } else { 30 };

        let mut out = Vec::new();
        while date <= self.clock.as_of {
            // Occasionally the collaborator sends no days-supply at all.
            let reported = if rng.chance(0.05) { None } else { Some(days_supply) };
            let mut fill = RawFill::new(code, &date.to_string(), reported).named(name);
            if rng.chance(0.03) {
                fill = fill.with_status(FillStatus::Cancelled);
            }
            out.push(fill);

            if habit == RefillHabit::SingleFill {
                break;
            }
            let delay = match habit {
                RefillHabit::Punctual => rng.next_u64_below(4) as i64 - 3,
                RefillHabit::Drifting => rng.next_u64_below(12) as i64,
                RefillHabit::Lapsing  => rng.next_u64_below(40) as i64,
                RefillHabit::SingleFill => 0,
            };
            date += Duration::days((days_supply + delay).max(1));
        }
        out
    }
}
