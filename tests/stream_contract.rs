// Stream contracts checked against both connection providers.
use proptest::prelude::*;

use rowstream::api::{
    self, Average, ConnectionProvider, FileStore, MemoryStore, Query, Record, StreamState, Value,
};

fn memory_table(count: usize) -> MemoryStore {
    let store = MemoryStore::new();
    let rows = (0..count as i64)
        .map(|i| vec![Value::Int(i), Value::Int(i * 3 - 7)])
        .collect();
    store
        .create_table("numbers", &["id", "score"], rows)
        .expect("table");
    store
}

fn file_table(count: usize) -> (tempfile::TempDir, FileStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = FileStore::new(temp.path().join("tables"));
    store
        .create_table(
            "numbers",
            vec!["id".to_string(), "score".to_string()],
            Some("id".to_string()),
        )
        .expect("create");
    let rows = (0..count as i64)
        .map(|i| vec![Value::Int(i), Value::Int(i * 3 - 7)])
        .collect::<Vec<_>>();
    store.insert_ignore("numbers", rows).expect("insert");
    (temp, store)
}

fn all_rows<P: ConnectionProvider>(provider: &P) -> Vec<Record> {
    api::stream_rows(provider, &Query::select_all("numbers"))
        .expect("rows")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect")
}

fn all_batches<P: ConnectionProvider>(provider: &P, size: i64) -> Vec<Vec<Record>> {
    api::stream_batches(provider, Query::select_all("numbers"), size)
        .expect("batches")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect")
}

proptest! {
    #[test]
    fn batches_concatenate_to_the_row_stream(count in 0usize..40, size in 1i64..10) {
        let store = memory_table(count);
        let rows = all_rows(&store);
        let batches = all_batches(&store, size);

        let size = size as usize;
        prop_assert!(batches.iter().all(|batch| !batch.is_empty() && batch.len() <= size));
        if let Some((_, full)) = batches.split_last() {
            prop_assert!(full.iter().all(|batch| batch.len() == size));
        }
        prop_assert_eq!(batches.into_iter().flatten().collect::<Vec<_>>(), rows);

        let stats = store.stats();
        prop_assert_eq!(stats.page_fetches as usize, count.div_ceil(size) + 1);
        prop_assert_eq!(stats.row_fetches as usize, count + 1);
        prop_assert_eq!(stats.opens, 2);
        prop_assert_eq!(stats.closes, 2);
    }

    #[test]
    fn paginator_fetches_exactly_what_is_requested(count in 1usize..30, size in 1i64..6, want in 0u64..4) {
        let store = memory_table(count);
        let available = count.div_ceil(size as usize) as u64;
        let want = want.min(available);
        let mut pages = api::paginate(&store, "numbers", size).expect("paginate");
        for expected in 1..=want {
            let page = pages.next_page().expect("page").expect("some page");
            prop_assert_eq!(page.number, expected);
            prop_assert_eq!(page.offset, (expected - 1) * size as u64);
        }
        prop_assert_eq!(pages.fetches(), want);
        prop_assert_eq!(store.stats().page_fetches, want);
        drop(pages);
        prop_assert_eq!(store.stats().closes, 1);
    }

    #[test]
    fn average_matches_the_arithmetic_mean(values in proptest::collection::vec(-1000i64..1000, 0..50)) {
        let store = MemoryStore::new();
        let rows = values.iter().map(|value| vec![Value::Int(*value)]).collect();
        store.create_table("samples", &["v"], rows).expect("table");
        let result = api::average(&store, &Query::select_column("samples", "v")).expect("average");
        if values.is_empty() {
            prop_assert_eq!(result, Average::NoData);
        } else {
            let total: i128 = values.iter().map(|value| i128::from(*value)).sum();
            prop_assert_eq!(result, Average::Mean(total as f64 / values.len() as f64));
        }
    }
}

#[test]
fn file_store_batches_match_its_row_stream() {
    let (_temp, store) = file_table(11);
    let rows = all_rows(&store);
    assert_eq!(rows.len(), 11);
    for size in 1..=12 {
        let batches = all_batches(&store, size);
        assert_eq!(batches.len(), 11usize.div_ceil(size as usize));
        assert_eq!(batches.into_iter().flatten().collect::<Vec<_>>(), rows);
    }
}

#[test]
fn file_store_row_stream_ends_exhausted() {
    let (_temp, store) = file_table(3);
    let mut rows = api::stream_rows(&store, &Query::select_column("numbers", "score")).expect("rows");
    let scores = rows
        .by_ref()
        .map(|row| row.expect("row").get("score").cloned().expect("score"))
        .collect::<Vec<_>>();
    assert_eq!(scores, vec![Value::Int(-7), Value::Int(-4), Value::Int(-1)]);
    assert_eq!(rows.state(), StreamState::Exhausted);
    assert!(rows.next().is_none());
}

#[test]
fn file_store_fetch_page_reads_one_window() {
    let (_temp, store) = file_table(7);
    let page = api::fetch_page(&store, &Query::select_column("numbers", "id"), 3, 5).expect("page");
    let ids = page
        .iter()
        .map(|record| record.get("id").cloned().expect("id"))
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![Value::Int(5), Value::Int(6)]);
}

#[test]
fn seeded_average_matches_the_example_table() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = FileStore::new(temp.path());
    store
        .create_table("user_data", vec!["user_id".to_string(), "age".to_string()], None)
        .expect("create");
    store
        .insert_ignore(
            "user_data",
            vec![
                vec![Value::from("a"), Value::Int(20)],
                vec![Value::from("b"), Value::Int(30)],
                vec![Value::from("c"), Value::Null],
                vec![Value::from("d"), Value::Int(40)],
            ],
        )
        .expect("insert");
    let aggregate = api::average_column(&store, "user_data", "age").expect("aggregate");
    assert_eq!(aggregate.count(), 3);
    assert_eq!(aggregate.average(), Average::Mean(30.0));
}
