//! Query execution over a borrowed collection.
//!
//! Documents flow through the stages in a fixed order: filter, sort, skip, limit,
//! projection. Counts always describe the filtered set before pagination.

use std::cmp::Ordering;

use bson::Document;

use memquery_core::{
    error::DocumentStoreResult,
    page::{Page, QueryOutcome},
    query::{QueryOptions, ResultMode, Sort, SortDirection},
};

use crate::{
    evaluator::{DocumentEvaluator, sort_key},
    projection::project,
};

/// Runs `options` against `documents` and shapes the result according to its mode.
///
/// The collection is only read.
pub fn execute(documents: &[Document], options: &QueryOptions, id_field: &str) -> DocumentStoreResult<QueryOutcome> {
    let positions = DocumentEvaluator::filter_positions(documents, options.filter.as_ref())?;
    let matched = positions.len();

    if options.mode == ResultMode::Count {
        return Ok(QueryOutcome::Count(matched));
    }

    let mut selected = positions.into_iter().map(|position| &documents[position]).collect::<Vec<_>>();

    if !options.sort.is_empty() {
        // `sort_by` is stable: ties keep collection order.
        selected.sort_by(|left, right| compare(left, right, &options.sort));
    }

    let page = selected
        .into_iter()
        .skip(options.skip.unwrap_or(0))
        .take(options.limit.unwrap_or(usize::MAX))
        .map(|document| match &options.projection {
            Some(projection) => project(document, projection, id_field),
            None => document.clone(),
        })
        .collect::<Vec<_>>();

    Ok(match options.mode {
        ResultMode::InlineCount => QueryOutcome::InlineCount(Page::new(page, matched)),
        _ => QueryOutcome::Values(page),
    })
}

fn compare(left: &Document, right: &Document, keys: &[Sort]) -> Ordering {
    keys.iter()
        .map(|key| {
            let ordering = sort_key(left, &key.field).total_cmp(&sort_key(right, &key.field));

            match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use bson::{Bson, doc};
    use memquery_core::query::{Filter, Projection};
    use proptest::prelude::*;

    use super::*;

    fn people() -> Vec<Document> {
        vec![
            doc! { "_id": "1", "name": "carol", "age": 41, "team": "red" },
            doc! { "_id": "2", "name": "alice", "age": 29, "team": "blue" },
            doc! { "_id": "3", "name": "bob", "team": "red" },
            doc! { "_id": "4", "name": "dave", "age": 29, "team": "red" },
        ]
    }

    fn ids(outcome: &QueryOutcome) -> Vec<&str> {
        outcome
            .values()
            .iter()
            .filter_map(|document| document.get_str("_id").ok())
            .collect()
    }

    #[test]
    fn default_mode_returns_matches_in_collection_order() {
        let options = QueryOptions::builder().filter(Filter::eq("team", "red")).build();
        let outcome = execute(&people(), &options, "_id").unwrap();

        assert!(matches!(outcome, QueryOutcome::Values(_)));
        assert_eq!(ids(&outcome), vec!["1", "3", "4"]);
    }

    #[test]
    fn sort_is_stable_and_missing_sorts_first() {
        let options = QueryOptions::builder().sort("age", SortDirection::Asc).build();
        let outcome = execute(&people(), &options, "_id").unwrap();

        assert_eq!(ids(&outcome), vec!["3", "2", "4", "1"]);

        let options = QueryOptions::builder()
            .sort("age", SortDirection::Desc)
            .sort("name", SortDirection::Desc)
            .build();
        let outcome = execute(&people(), &options, "_id").unwrap();

        assert_eq!(ids(&outcome), vec!["1", "4", "2", "3"]);
    }

    #[test]
    fn pagination_happens_after_sorting() {
        let options = QueryOptions::builder()
            .sort("name", SortDirection::Asc)
            .skip(1)
            .limit(2)
            .build();

        assert_eq!(ids(&execute(&people(), &options, "_id").unwrap()), vec!["3", "1"]);
    }

    #[test]
    fn counts_ignore_pagination() {
        let count = QueryOptions::builder().filter(Filter::eq("team", "red")).skip(2).limit(1).count().build();
        assert_eq!(execute(&people(), &count, "_id").unwrap(), QueryOutcome::Count(3));

        let inline = QueryOptions::builder()
            .filter(Filter::eq("team", "red"))
            .skip(2)
            .limit(1)
            .inline_count()
            .build();
        let outcome = execute(&people(), &inline, "_id").unwrap();

        assert_eq!(outcome.count(), Some(3));
        assert_eq!(ids(&outcome), vec!["4"]);
    }

    #[test]
    fn projection_applies_to_the_page_only() {
        let options = QueryOptions::builder()
            .select(Projection::include(["name"]))
            .sort("age", SortDirection::Desc)
            .limit(1)
            .build();

        assert_eq!(
            execute(&people(), &options, "_id").unwrap(),
            QueryOutcome::Values(vec![doc! { "_id": "1", "name": "carol" }])
        );
    }

    #[test]
    fn skip_past_the_end_and_zero_limit_are_empty() {
        let skip = QueryOptions::builder().skip(10).build();
        assert!(execute(&people(), &skip, "_id").unwrap().values().is_empty());

        let limit = QueryOptions::builder().limit(0).build();
        assert!(execute(&people(), &limit, "_id").unwrap().values().is_empty());
    }

    proptest! {
        #[test]
        fn page_length_follows_skip_and_limit(
            ages in prop::collection::vec(0i32..50, 0..40),
            threshold in 0i32..50,
            skip in 0usize..50,
            limit in 0usize..50,
        ) {
            let documents = ages
                .iter()
                .enumerate()
                .map(|(index, age)| doc! { "_id": index as i64, "age": *age })
                .collect::<Vec<_>>();
            let matched = ages.iter().filter(|age| **age >= threshold).count();

            let options = QueryOptions::builder()
                .filter(Filter::gte("age", threshold))
                .skip(skip)
                .limit(limit)
                .inline_count()
                .build();
            let outcome = execute(&documents, &options, "_id").unwrap();

            prop_assert_eq!(outcome.count(), Some(matched));
            prop_assert_eq!(outcome.values().len(), limit.min(matched.saturating_sub(skip)));
        }

        #[test]
        fn sorting_is_ordered_and_stable(ages in prop::collection::vec(0i32..5, 0..40)) {
            let documents = ages
                .iter()
                .enumerate()
                .map(|(index, age)| doc! { "_id": index as i64, "age": *age })
                .collect::<Vec<_>>();

            let options = QueryOptions::builder().sort("age", SortDirection::Asc).build();
            let outcome = execute(&documents, &options, "_id").unwrap();
            let sorted = outcome
                .values()
                .iter()
                .map(|document| (document.get_i32("age").unwrap(), document.get_i64("_id").unwrap()))
                .collect::<Vec<_>>();

            prop_assert_eq!(sorted.len(), documents.len());
            for pair in sorted.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
        }
    }

    #[test]
    fn mixed_types_sort_by_kind() {
        let documents = vec![
            doc! { "_id": 1, "v": "text" },
            doc! { "_id": 2, "v": true },
            doc! { "_id": 3, "v": 10 },
            doc! { "_id": 4, "v": Bson::Null },
        ];
        let options = QueryOptions::builder().sort("v", SortDirection::Asc).build();
        let outcome = execute(&documents, &options, "_id").unwrap();

        let order = outcome
            .values()
            .iter()
            .filter_map(|document| document.get_i32("_id").ok())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![4, 3, 1, 2]);
    }
}
