use lingo_checkpoint::{
    CheckpointId, CheckpointSaver, InMemoryCheckpointSaver, SqliteCheckpointSaver, ThreadKey,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;

const THREADS: [&str; 3] = ["a", "b", "c"];

fn apply_ops(store: &dyn CheckpointSaver, ops: &[(usize, i64)]) -> HashMap<usize, Vec<i64>> {
    let mut expected: HashMap<usize, Vec<i64>> = HashMap::new();
    for &(thread, value) in ops {
        let key = ThreadKey::thread(THREADS[thread]);
        let id = store.put(&key, json!({ "value": value }), None).unwrap();
        let history = expected.entry(thread).or_default();
        history.push(value);
        assert_eq!(id, CheckpointId::new(history.len() as u64));
    }
    expected
}

fn check_histories(store: &dyn CheckpointSaver, expected: &HashMap<usize, Vec<i64>>) {
    for (index, name) in THREADS.iter().enumerate() {
        let key = ThreadKey::thread(*name);
        let values: Vec<i64> = store
            .list(&key)
            .unwrap()
            .map(|c| c.unwrap().payload["value"].as_i64().unwrap())
            .collect();
        let want = expected.get(&index).cloned().unwrap_or_default();
        assert_eq!(values, want);

        let latest = store.get_latest(&key).unwrap();
        assert_eq!(
            latest.map(|c| (c.id.get(), c.payload["value"].as_i64().unwrap())),
            want.last().map(|v| (want.len() as u64, *v))
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn memory_ids_are_dense_and_isolated(ops in prop::collection::vec((0usize..3, any::<i64>()), 0..40)) {
        let store = InMemoryCheckpointSaver::new();
        let expected = apply_ops(&store, &ops);
        check_histories(&store, &expected);
    }

    #[test]
    fn sqlite_ids_are_dense_and_isolated(ops in prop::collection::vec((0usize..3, any::<i64>()), 0..40)) {
        let store = SqliteCheckpointSaver::open_in_memory().unwrap();
        store.setup().unwrap();
        let expected = apply_ops(&store, &ops);
        check_histories(&store, &expected);
    }

    #[test]
    fn sqlite_payload_text_round_trips(text in "\\PC{0,64}", n in any::<u32>()) {
        let store = SqliteCheckpointSaver::open_in_memory().unwrap();
        store.setup().unwrap();
        let key = ThreadKey::thread("t1");
        let payload = json!({"messages": [{"role": "user", "content": text}], "n": n});

        store.put(&key, payload.clone(), None).unwrap();
        let latest = store.get_latest(&key).unwrap().unwrap();
        prop_assert_eq!(latest.payload, payload);
    }
}
