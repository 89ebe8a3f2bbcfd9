//! Deduplication of merged cross-shard rows

use ahash::AHashSet;

use crate::data::Record;

/// Field groups tried when none are configured, most specific first
pub fn default_dedup_fields() -> Vec<Vec<String>> {
    const GROUPS: &[&[&str]] = &[
        &["id"],
        &["user_id", "order_id", "payment_id"],
        &["user_id", "order_id"],
        &["order_id", "payment_id"],
        &["user_id"],
        &["order_id"],
        &["payment_id"],
        &["log_id"],
        &["product_id"],
    ];
    GROUPS
        .iter()
        .map(|g| g.iter().map(|f| f.to_string()).collect())
        .collect()
}

fn usable(record: &Record, field: &str) -> Option<String> {
    record
        .get(field)
        .filter(|v| !v.is_null())
        .map(|v| v.to_string_value())
        .filter(|s| !s.is_empty())
}

/// Uniqueness key of a record.
///
/// Built from the first group whose fields are all present and non-empty,
/// else from every non-empty column in name order.
pub fn result_key(record: &Record, groups: &[Vec<String>]) -> String {
    for group in groups {
        if group.is_empty() {
            continue;
        }
        let parts: Option<Vec<String>> = group
            .iter()
            .map(|f| usable(record, f).map(|v| format!("{}:{}", f, v)))
            .collect();
        if let Some(parts) = parts {
            return parts.join("|");
        }
    }

    let mut parts: Vec<(&str, String)> = record
        .column_names()
        .filter_map(|name| usable(record, name).map(|v| (name, v)))
        .collect();
    parts.sort_by(|a, b| a.0.cmp(b.0));
    parts
        .into_iter()
        .map(|(name, v)| format!("{}:{}", name, v))
        .collect::<Vec<_>>()
        .join("|")
}

/// Drop records whose key was already seen; survivors keep their order
pub fn deduplicate(records: Vec<Record>, groups: &[Vec<String>]) -> Vec<Record> {
    let mut seen = AHashSet::with_capacity(records.len());
    let before = records.len();
    let out: Vec<Record> = records
        .into_iter()
        .filter(|r| seen.insert(result_key(r, groups)))
        .collect();
    if out.len() < before {
        log::debug!("dedup dropped {} of {} rows", before - out.len(), before);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use proptest::prelude::*;

    fn groups(items: &[&[&str]]) -> Vec<Vec<String>> {
        items.iter().map(|g| g.iter().map(|s| s.to_string()).collect()).collect()
    }

    #[test]
    fn test_result_key_first_complete_group() {
        let g = groups(&[&["user_id", "order_id"], &["user_id"]]);
        let full = Record::new().with("order_id", 7i64).with("user_id", 1i64);
        assert_eq!(result_key(&full, &g), "user_id:1|order_id:7");

        let partial = Record::new().with("user_id", 1i64).with("order_id", Value::Null);
        assert_eq!(result_key(&partial, &g), "user_id:1");

        let empty_str = Record::new().with("user_id", 1i64).with("order_id", "");
        assert_eq!(result_key(&empty_str, &g), "user_id:1");
    }

    #[test]
    fn test_result_key_fallback_sorted() {
        let g = groups(&[&["id"]]);
        let r = Record::new().with("b", 2i64).with("a", "x").with("c", Value::Null);
        assert_eq!(result_key(&r, &g), "a:x|b:2");
        assert_eq!(result_key(&Record::new(), &g), "");
    }

    #[test]
    fn test_deduplicate_first_wins() {
        let g = default_dedup_fields();
        let rows = vec![
            Record::new().with("id", 1i64).with("v", "first"),
            Record::new().with("id", 2i64).with("v", "other"),
            Record::new().with("id", 1i64).with("v", "second"),
        ];
        let out = deduplicate(rows, &g);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("v"), Some(&Value::from("first")));
        assert_eq!(out[1].get("id"), Some(&Value::Int64(2)));
    }

    #[test]
    fn test_numeric_and_string_keys_collide() {
        let g = groups(&[&["user_id"]]);
        let rows = vec![
            Record::new().with("user_id", 5i64),
            Record::new().with("user_id", "5"),
        ];
        assert_eq!(deduplicate(rows, &g).len(), 1);
    }

    #[test]
    fn test_default_groups() {
        let g = default_dedup_fields();
        assert_eq!(g.len(), 9);
        assert_eq!(g[0], vec!["id".to_string()]);
        assert_eq!(g[8], vec!["product_id".to_string()]);
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        prop::collection::vec((prop::sample::select(vec!["id", "user_id", "order_id", "x"]), prop::option::of(0i64..4)), 0..4)
            .prop_map(|cols| {
                let mut r = Record::new();
                for (name, v) in cols {
                    r.insert(name, Value::from(v));
                }
                r
            })
    }

    proptest! {
        #[test]
        fn prop_dedup_idempotent(rows in prop::collection::vec(arb_record(), 0..30)) {
            let g = default_dedup_fields();
            let once = deduplicate(rows, &g);
            let twice = deduplicate(once.clone(), &g);
            prop_assert_eq!(once, twice);
        }
    }
}
