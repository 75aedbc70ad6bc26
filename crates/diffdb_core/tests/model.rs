//! Model-based tests: random add/apply/reopen sequences checked against a
//! plain in-memory model of the committed and staged sets.

use diffdb_core::{CancelToken, Config, CoreError, Database, Differential, NeverCancel};
use diffdb_storage::InMemoryBackend;
use proptest::prelude::*;
use std::collections::BTreeMap;

const IDS: u8 = 6;

#[derive(Debug, Clone)]
enum Op {
    Add { id: u8, value: u8 },
    Apply { failing: u8 },
    Cancel { after: u8 },
    Reopen,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..IDS, 0..3u8).prop_map(|(id, value)| Op::Add { id, value }),
        1 => any::<u8>().prop_map(|failing| Op::Apply { failing }),
        1 => (0..4u8).prop_map(|after| Op::Cancel { after }),
        1 => Just(Op::Reopen),
    ]
}

#[derive(Debug, Default)]
struct Model {
    committed: BTreeMap<u8, u8>,
    pending: BTreeMap<u8, u8>,
}

impl Model {
    fn add(&mut self, id: u8, value: u8) {
        if self.committed.get(&id) == Some(&value) || self.pending.get(&id) == Some(&value) {
            return;
        }
        self.pending.insert(id, value);
    }

    fn promote(&mut self, id: u8) {
        let value = self.pending.remove(&id).unwrap();
        self.committed.insert(id, value);
    }
}

struct Harness {
    backend: InMemoryBackend,
    _db: Database,
    diff: Differential,
}

impl Harness {
    fn open(backend: InMemoryBackend) -> Self {
        let db = Database::open_with_backend(
            Config::default().sync_on_commit(false),
            Box::new(backend.clone()),
        )
        .unwrap();
        let diff = db.open_differential("model").unwrap();
        Self {
            backend,
            _db: db,
            diff,
        }
    }
}

fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut harness = Harness::open(InMemoryBackend::new());
    let mut model = Model::default();

    for op in ops {
        match op {
            Op::Add { id, value } => {
                harness.diff.add(&[id], &value).unwrap();
                model.add(id, value);
            }
            Op::Apply { failing } => {
                let expected: Vec<(u8, u8)> =
                    model.pending.iter().map(|(id, value)| (*id, *value)).collect();
                let mut seen = Vec::new();
                let result = harness.diff.each(&NeverCancel, |id, data| {
                    let value: u8 = data.decode()?;
                    seen.push((id[0], value));
                    if failing & (1u8 << id[0]) != 0 {
                        Err(CoreError::invalid_operation("rejected"))
                    } else {
                        Ok(())
                    }
                });
                prop_assert_eq!(&seen, &expected);

                let rejected: Vec<u8> = expected
                    .iter()
                    .map(|(id, _)| *id)
                    .filter(|id| failing & (1u8 << *id) != 0)
                    .collect();
                for (id, _) in &expected {
                    if !rejected.contains(id) {
                        model.promote(*id);
                    }
                }
                match result {
                    Ok(()) => prop_assert!(rejected.is_empty()),
                    Err(err) => {
                        let errors = err.apply_errors().unwrap();
                        let ids: Vec<u8> = errors.failed_ids().map(|id| id[0]).collect();
                        prop_assert_eq!(ids, rejected);
                        prop_assert!(!errors.is_cancelled());
                    }
                }
            }
            Op::Cancel { after } => {
                let staged = model.pending.len();
                let token = CancelToken::new();
                if after == 0 {
                    token.cancel();
                }
                let mut processed = 0u8;
                let result = harness.diff.each(&token, |_, _| {
                    processed += 1;
                    if processed == after {
                        token.cancel();
                    }
                    Ok::<_, CoreError>(())
                });

                let ids: Vec<u8> = model.pending.keys().take(after as usize).copied().collect();
                for id in ids {
                    model.promote(id);
                }
                prop_assert_eq!(result.is_err(), (after as usize) < staged);
                if let Err(err) = result {
                    prop_assert!(err.apply_errors().unwrap().is_cancelled());
                }
            }
            Op::Reopen => {
                let backend = harness.backend.clone();
                harness = Harness::open(backend);
            }
        }

        prop_assert_eq!(harness.diff.count_changes().unwrap(), model.pending.len());
        prop_assert_eq!(harness.diff.count_tracking().unwrap(), model.committed.len());
        for (id, value) in &model.committed {
            prop_assert!(!harness.diff.changed(&[*id], value).unwrap());
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_sequences_match_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        run(ops)?;
    }
}
