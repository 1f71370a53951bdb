//! Property test: merging arbitrary sequences of partial fetches into
//! one instance is monotone. Field knowledge only ever widens, and a
//! fetch never reverts what an earlier fetch established.

use docmap_core::{
    document::{Attrs, Document},
    model::{registry::Registry, FieldKind, ModelSchema},
    selection::FieldSelection,
    session::Session,
    store::MemoryStore,
};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::{collections::HashSet, sync::Arc};

const FIELDS: [&str; 4] = ["title", "genre", "country", "year"];

// `year` is seeded unset: fetching it confirms absence instead of a
// value.
const UNSET_FIELD: usize = 3;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::document("Movie")
                .field("title", FieldKind::Text)
                .field("genre", FieldKind::Text)
                .field("country", FieldKind::Text)
                .optional("year", FieldKind::Int)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn partial_fetches_are_monotone(
        fetches in prop::collection::vec(prop::collection::vec(0usize..4, 0..4), 1..6)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let outcome: Result<(), TestCaseError> = rt.block_on(async move {
            let root = Session::root(registry(), Arc::new(MemoryStore::new())).unwrap();

            let seeder = root.fork();
            let seeded = seeder
                .collection("Movie")
                .unwrap()
                .create(
                    Attrs::new()
                        .set("title", "Inception")
                        .set("genre", "action")
                        .set("country", "USA"),
                )
                .unwrap();
            let id = seeded.id().to_string();
            seeded.save().await.unwrap();

            let session = root.fork();
            let movies = session.collection("Movie").unwrap();
            let mut requested: HashSet<usize> = HashSet::new();
            let mut held: Option<Document> = None;

            for subset in &fetches {
                let selection =
                    FieldSelection::only(subset.iter().map(|index| FIELDS[*index]));
                let fetched = movies.get_with(&id, &selection).await.unwrap();

                if let Some(previous) = &held {
                    prop_assert!(Document::ptr_eq(previous, &fetched));
                }
                requested.extend(subset.iter().copied());

                for (index, field) in FIELDS.iter().enumerate() {
                    let presence = fetched.presence(field).unwrap();
                    if !requested.contains(&index) {
                        prop_assert!(presence.is_unknown());
                    } else if index == UNSET_FIELD {
                        prop_assert!(presence.is_absent());
                    } else {
                        prop_assert!(presence.is_present());
                    }
                }

                held = Some(fetched);
            }

            Ok(())
        });
        outcome?;
    }
}
