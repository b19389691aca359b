#![cfg(test)]

use molstore::{
    Database, DatabaseOptions, FLAG_IN_REDUCTION, GroupKey, IndexPair, Instance, Record,
    ReductionOptions, Selection, Selector, StageId,
};
use molstore_array::{NdArray, PType, Shape};
use molstore_backend::{Backend, MemoryBackend};
use molstore_error::MolError;
use serde_json::json;
use tempfile::TempDir;

fn molecule(species: &[i64], base: f64) -> Record {
    let n = species.len();
    let forces = (0..n * 3).map(|i| base + i as f64).collect::<Vec<_>>();
    Record::new()
        .with_property("species", NdArray::from_slice(species))
        .with_property("forces", NdArray::from_vec([n, 3], forces).unwrap())
        .with_property("energy", NdArray::scalar(-base))
}

fn pair(size: usize, offset: usize) -> IndexPair {
    IndexPair::new(GroupKey::new(size).unwrap(), offset)
}

#[test]
fn padded_batch_across_groups() {
    let mut db = Database::in_memory(DatabaseOptions::default()).unwrap();
    db.add_instance(molecule(&[1, 8, 1], 1.0)).unwrap();
    db.add_instance(molecule(&[1, 8, 1, 4, 5], 100.0)).unwrap();

    let keys = db
        .group_keys()
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["003", "005"]);
    assert_eq!(db.global_index().unwrap(), vec![pair(3, 0), pair(5, 0)]);

    let selector = Selector::try_from(&NdArray::from_vec([2, 2], vec![3i64, 0, 5, 0]).unwrap())
        .unwrap();
    let Selection::Dense(batch) = db.get_item(&selector, true).unwrap() else {
        panic!("expected a dense batch");
    };
    let forces = batch.property("forces").unwrap();
    assert_eq!(forces.shape(), &Shape::from([2, 5, 3]));

    let first = forces.row(0).unwrap();
    let values = first.as_slice::<f64>().unwrap();
    assert_eq!(&values[..9], &(0..9).map(|i| 1.0 + i as f64).collect::<Vec<_>>()[..]);
    assert!(values[9..].iter().all(|&v| v == 0.0));

    let second = forces.row(1).unwrap();
    assert_eq!(
        second.as_slice::<f64>().unwrap(),
        &(0..15).map(|i| 100.0 + i as f64).collect::<Vec<_>>()[..]
    );

    let energy = batch.property("energy").unwrap();
    assert_eq!(energy.as_slice::<f64>().unwrap(), &[-1.0, -100.0]);
}

#[test]
fn round_trip_every_record() {
    let mut db = Database::in_memory(DatabaseOptions::default()).unwrap();
    let records = (1..=6)
        .map(|n| molecule(&vec![1; n % 3 + 1], n as f64 * 10.0))
        .collect::<Vec<_>>();
    let pairs = db.add_instance(records.clone()).unwrap();

    for (record, pair) in records.iter().zip(&pairs) {
        assert_eq!(pair.group.entity_size(), record.entity_size().unwrap());
        let Selection::Record(stored) = db.get_item(&Selector::Single(*pair), false).unwrap() else {
            panic!("expected a single record");
        };
        assert_eq!(&stored, record.properties());
    }
}

#[test]
fn nested_lists_count_every_record() {
    let mut db = Database::in_memory(DatabaseOptions::default()).unwrap();
    let nested = Instance::List(vec![
        molecule(&[1], 1.0).into(),
        Instance::List(vec![
            molecule(&[1, 1], 2.0).into(),
            Instance::List(vec![molecule(&[1], 3.0).into()]),
        ]),
        molecule(&[1, 1, 1], 4.0).into(),
    ]);
    let pairs = db.add_instance(nested).unwrap();
    assert_eq!(pairs.len(), 4);
    assert_eq!(db.len(), 4);
    assert_eq!(db.global_index().unwrap().len(), 4);
    assert_eq!(pairs[2], pair(1, 1));
}

#[test]
fn failure_mid_list_keeps_earlier_records() {
    let mut db = Database::in_memory(DatabaseOptions::default()).unwrap();
    let bad = Record::new()
        .with_property("species", NdArray::from_slice(&[1i64, 1]))
        .with_property("forces", NdArray::zeros(PType::F64, [2, 3]));
    let err = db
        .add_instance(vec![molecule(&[1], 1.0), bad, molecule(&[1], 2.0)])
        .unwrap_err();
    assert!(matches!(err, MolError::MissingProperty(..)));
    assert_eq!(db.len(), 1);
    assert_eq!(db.flags().unwrap().len(), 1);
}

#[test]
fn json_ingestion() {
    let mut db = Database::in_memory(DatabaseOptions::default()).unwrap();
    let input = json!([
        {"species": [1, 8, 1], "forces": [[0, 0, 1], [0, 1, 0], [1, 0, 0]]},
        {"species": [6, 1, 1, 1, 1], "forces": [[0.5, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0]], "global_property": 1}
    ]);
    let pairs = db.add_instance(Instance::from_json(&input).unwrap()).unwrap();
    assert_eq!(pairs, vec![pair(3, 0), pair(5, 0)]);
    assert_eq!(db.flags().unwrap(), vec![0.0, 1.0]);
    assert_eq!(db.schema().unwrap().template("forces").unwrap().ptype, PType::F64);

    assert!(matches!(
        Instance::from_json(&json!(42)).unwrap_err(),
        MolError::UnsupportedType(..)
    ));
    assert!(matches!(
        Selector::from_json(&json!([[[3, 0]]])).unwrap_err(),
        MolError::UnsupportedSelector(..)
    ));
}

#[test]
fn json_follows_the_stored_element_types() {
    let mut db = Database::in_memory(DatabaseOptions::default()).unwrap();
    db.add_record(
        &Record::new()
            .with_property("species", NdArray::from_slice(&[1i64, 1]))
            .with_property("charges", NdArray::from_slice(&[1i32, -1])),
    )
    .unwrap();

    let pairs = db
        .add_json(&json!([[{"species": [8, 1], "charges": [-2, 1]}], {"species": [1], "charges": [0]}]))
        .unwrap();
    assert_eq!(pairs, vec![pair(2, 1), pair(1, 0)]);
    let Selection::Record(stored) = db.get_item(&Selector::Single(pair(2, 1)), false).unwrap()
    else {
        panic!("expected a single record");
    };
    assert_eq!(stored["charges"].as_slice::<i32>().unwrap(), &[-2, 1]);

    let err = db
        .add_json(&json!([{"species": [1], "charges": [1]}, {"species": [1], "charges": [0.5]}]))
        .unwrap_err();
    assert!(matches!(err.root(), MolError::MismatchedTypes(..)));
    assert_eq!(db.len(), 4);

    assert!(matches!(
        db.add_json(&json!("record")).unwrap_err(),
        MolError::UnsupportedType(..)
    ));
}

#[test]
fn chunk_windows_cover_the_population_once() {
    let mut db = Database::in_memory(DatabaseOptions::default()).unwrap();
    for i in 0..23usize {
        let flag = if i % 5 == 0 { 1.0 } else { 0.0 };
        db.add_record(&molecule(&vec![1; i % 4 + 1], i as f64).with_global_property(flag))
            .unwrap();
    }
    let population = db.flags().unwrap().iter().filter(|&&f| f != 1.0).count();
    assert_eq!(population, 18);

    let loader = db.get_chunk_loader(4, None).unwrap();
    assert_eq!(loader.len(), population.div_ceil(4));
    let sizes = (0..loader.len())
        .map(|i| loader.window(i).unwrap().len())
        .collect::<Vec<_>>();
    assert_eq!(sizes, vec![4, 4, 4, 4, 2]);

    let mut seen = Vec::new();
    for batch in loader.iter() {
        seen.extend(batch.unwrap().indices);
    }
    let expected = loader.entries().iter().map(|e| e.pair).collect::<Vec<_>>();
    assert_eq!(seen, expected);
    assert!(expected.windows(2).all(|w| w[0].group <= w[1].group));
}

#[test]
fn reduction_sampling_marks_distinct_positions() {
    let mut db = Database::in_memory(DatabaseOptions::default().with_seed(3)).unwrap();
    for i in 0..11usize {
        db.add_record(&molecule(&vec![1; i % 3 + 1], i as f64)).unwrap();
    }
    let stage = db
        .create_initial_reduction("initial", 0.5, &ReductionOptions::default())
        .unwrap();
    assert_eq!(stage.indices.len(), 5);

    let mut unique = stage.indices.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 5);

    let index = db.global_index().unwrap();
    let flags = db.flags().unwrap();
    for (pair, flag) in index.iter().zip(&flags) {
        assert_eq!(stage.indices.contains(pair), *flag == FLAG_IN_REDUCTION);
    }

    let dumped = db.dump_reduction("initial", None).unwrap();
    assert_eq!(dumped.len(), 5);
    assert_eq!(db.reduction_names().unwrap(), vec!["initial"]);
}

#[test]
fn directory_store_reopens() {
    let dir = TempDir::new().unwrap();
    let options = DatabaseOptions::default().with_chunk_rows(2).unwrap();
    {
        let mut db = Database::open_dir(dir.path(), options.clone()).unwrap();
        for i in 0..5usize {
            db.add_record(&molecule(&vec![1; i % 2 + 2], i as f64)).unwrap();
        }
        db.create_initial_reduction("r", 0.4, &ReductionOptions::default())
            .unwrap();
    }

    let mut db = Database::open_dir(dir.path(), options.clone()).unwrap();
    assert_eq!(db.len(), 5);
    assert_eq!(db.property_names(), &["energy", "forces", "species"]);
    assert_eq!(db.reduction_stages("r").unwrap(), vec![StageId::FIRST]);
    assert_eq!(db.get_last_reduction("r").unwrap().indices.len(), 2);

    let record = db.get_record(pair(3, 1)).unwrap();
    assert_eq!(&record, molecule(&[1, 1, 1], 3.0).properties());

    let next = db.add_record(&molecule(&[1, 1], 9.0)).unwrap();
    assert_eq!(next, pair(2, 3));

    let cleared = Database::open_dir(dir.path(), options.with_overwriting(true)).unwrap();
    assert!(cleared.is_empty());
    assert!(cleared.schema().is_none());
    assert!(cleared.backend().list_children("").unwrap().is_empty());
}

#[test]
fn explicit_property_names_project_records() {
    let options = DatabaseOptions::default().with_property_names(["forces"]);
    let mut db = Database::open(MemoryBackend::new(), options).unwrap();
    db.add_record(&molecule(&[1, 8, 1], 0.0)).unwrap();
    assert_eq!(db.property_names(), &["forces", "species"]);
    assert!(!db.backend().contains("data/003/energy"));
    assert!(db.backend().is_array("global/leaf_structure/forces"));
}
